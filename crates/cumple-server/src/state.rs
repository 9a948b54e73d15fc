use chrono::NaiveDate;
use cumple_core::service::Notifier;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub notifier: Notifier,
    /// Shared key for `/run` and `/warmup`. Open when `None`.
    pub run_token: Option<String>,
    /// Fixed "today" for runs. Local date when `None`.
    pub today: Option<NaiveDate>,
}

impl AppState {
    pub fn new(notifier: Notifier, run_token: Option<String>) -> Self {
        Self {
            notifier,
            run_token,
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}
