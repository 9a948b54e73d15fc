use thiserror::Error;

#[derive(Debug, Error)]
pub enum CumpleError {
    #[error("invalid date '{0}': expected dd/mm/yy or dd/mm/yyyy")]
    InvalidDate(String),

    #[error("roster is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("messaging session did not become ready: {0}")]
    SessionFailed(String),

    #[error("session is not ready (state: {0})")]
    SessionNotReady(String),

    #[error("roster has no 'Sent' column to record deliveries in")]
    MissingSentColumn,

    #[error("ledger write failed: {0}")]
    Ledger(String),

    #[error("roster error: {0}")]
    Roster(String),

    #[error("row {0} is outside the roster")]
    RowOutOfRange(usize),

    #[error("webdriver error: {0}")]
    WebDriver(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CumpleError>;
