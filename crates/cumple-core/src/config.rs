use crate::date::WindowPolicy;
use crate::error::{CumpleError, Result};
use crate::message::DEFAULT_TEMPLATE;
use crate::paths;
use crate::session::SessionTiming;
use crate::webdriver::LaunchOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RosterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RosterConfig {
    /// YAML roster file, relative paths resolved against the project root.
    File {
        #[serde(default = "default_roster_file")]
        path: PathBuf,
    },
    /// Google Sheets spreadsheet.
    Sheets {
        spreadsheet_id: String,
        /// Worksheet title. The first worksheet when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worksheet: Option<String>,
        /// Environment variable holding an OAuth access token.
        #[serde(default = "default_token_env")]
        token_env: String,
    },
}

fn default_roster_file() -> PathBuf {
    PathBuf::from("roster.yaml")
}

fn default_token_env() -> String {
    "SHEETS_TOKEN".to_string()
}

impl Default for RosterConfig {
    fn default() -> Self {
        RosterConfig::File {
            path: default_roster_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// First readiness poll window. Never less than 20s in practice.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
    #[serde(default = "default_post_send")]
    pub post_send_ms: u64,
    #[serde(default = "default_recipient_pause")]
    pub recipient_pause_secs: u64,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdriver_url: Option<String>,
    #[serde(default = "default_chromedriver")]
    pub chromedriver: String,
}

fn default_ready_timeout() -> u64 {
    12
}

fn default_settle() -> u64 {
    8
}

fn default_post_send() -> u64 {
    1500
}

fn default_recipient_pause() -> u64 {
    2
}

fn default_headless() -> bool {
    true
}

fn default_chromedriver() -> String {
    "chromedriver".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
            settle_secs: default_settle(),
            post_send_ms: default_post_send(),
            recipient_pause_secs: default_recipient_pause(),
            headless: default_headless(),
            chrome_bin: None,
            webdriver_url: None,
            chromedriver: default_chromedriver(),
        }
    }
}

impl SessionConfig {
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            settle: Duration::from_secs(self.settle_secs),
            post_send: Duration::from_millis(self.post_send_ms),
            ..SessionTiming::default()
        }
    }

    pub fn recipient_pause(&self) -> Duration {
        Duration::from_secs(self.recipient_pause_secs)
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Shared key required by the trigger endpoints (`?key=`). Open when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Look-ahead window in days, today included.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Phone numbers every reminder is sent to.
    #[serde(default = "default_recipients")]
    pub recipients: Vec<String>,
    /// Durable directory for the browser profile and the readiness snapshot.
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_dir: Option<PathBuf>,
    #[serde(default = "default_template")]
    pub message_template: String,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    1
}

fn default_window_days() -> u32 {
    3
}

fn default_recipients() -> Vec<String> {
    vec!["5217292251844".to_string()]
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_PERSIST_DIR)
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            window_days: default_window_days(),
            recipients: default_recipients(),
            persist_dir: default_persist_dir(),
            profile_dir: None,
            message_template: default_template(),
            roster: RosterConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load `<root>/cumple.yaml`, or defaults when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Apply deployment environment variables on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("WINDOW_DAYS") {
            self.window_days = parse_var("WINDOW_DAYS", &v)?;
        }
        if let Some(v) = var("RECIPIENTS") {
            self.recipients = split_recipients(&v);
        }
        if let Some(v) = var("PERSIST_DIR") {
            self.persist_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PROFILE_DIR") {
            self.profile_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("READY_TIMEOUT_SECS") {
            self.session.ready_timeout_secs = parse_var("READY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("SETTLE_SECS") {
            self.session.settle_secs = parse_var("SETTLE_SECS", &v)?;
        }
        if let Some(v) = var("RECIPIENT_PAUSE_SECS") {
            self.session.recipient_pause_secs = parse_var("RECIPIENT_PAUSE_SECS", &v)?;
        }
        if let Some(v) = var("HEADLESS") {
            self.session.headless = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = var("CHROME_BIN") {
            self.session.chrome_bin = Some(v);
        }
        if let Some(v) = var("WEBDRIVER_URL") {
            self.session.webdriver_url = Some(v);
        }
        if let Some(v) = var("RUN_TOKEN") {
            self.server.run_token = Some(v);
        }
        if let Some(v) = var("ROSTER_FILE") {
            self.roster = RosterConfig::File {
                path: PathBuf::from(v),
            };
        }
        if let Some(id) = var("SHEET_ID") {
            let token_env = match &self.roster {
                RosterConfig::Sheets { token_env, .. } => token_env.clone(),
                RosterConfig::File { .. } => default_token_env(),
            };
            self.roster = RosterConfig::Sheets {
                spreadsheet_id: id,
                worksheet: var("WORKSHEET_NAME"),
                token_env,
            };
        }
        Ok(())
    }

    pub fn window(&self) -> Result<WindowPolicy> {
        WindowPolicy::new(self.window_days)
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir
            .clone()
            .unwrap_or_else(|| paths::default_profile_dir(&self.persist_dir))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        paths::snapshot_path(&self.persist_dir)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            chrome_bin: self.session.chrome_bin.clone(),
            profile_dir: self.profile_dir(),
            headless: self.session.headless,
            webdriver_url: self.session.webdriver_url.clone(),
            chromedriver: self.session.chromedriver.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.window_days == 0 {
            push(WarnLevel::Error, "window_days must be at least 1".into());
        }

        if self.recipients.is_empty() {
            push(
                WarnLevel::Error,
                "no recipients configured: reminders would never be delivered".into(),
            );
        }
        for r in &self.recipients {
            let digits = r.strip_prefix('+').unwrap_or(r);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                push(
                    WarnLevel::Warning,
                    format!("recipient '{r}' is not a plain phone number"),
                );
            }
        }

        if !self.message_template.contains("{name}") {
            push(
                WarnLevel::Warning,
                "message_template does not mention {name}".into(),
            );
        }

        if let RosterConfig::Sheets {
            spreadsheet_id,
            token_env,
            ..
        } = &self.roster
        {
            if spreadsheet_id.trim().is_empty() {
                push(WarnLevel::Error, "roster.spreadsheet_id is empty".into());
            }
            if std::env::var(token_env).is_err() {
                push(
                    WarnLevel::Warning,
                    format!("access token variable '{token_env}' is not set"),
                );
            }
        }

        warnings
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CumpleError::Config(format!("{key}={value} is not a valid number")))
}

/// Comma-separated phone list, blanks dropped.
pub fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.window_days, 3);
        assert_eq!(cfg.recipients, vec!["5217292251844"]);
        assert_eq!(cfg.profile_dir(), PathBuf::from("/data/chrome-profile"));
        assert_eq!(cfg.snapshot_path(), PathBuf::from("/data/qr.png"));
        assert!(cfg.session.headless);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.window_days = 5;
        cfg.roster = RosterConfig::Sheets {
            spreadsheet_id: "1AbC".into(),
            worksheet: Some("Cumples".into()),
            token_env: "SHEETS_TOKEN".into(),
        };
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "window_days: 7\nroster:\n  type: sheets\n  spreadsheet_id: xyz\nsession:\n  headless: false\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.window_days, 7);
        assert!(!cfg.session.headless);
        assert_eq!(cfg.session.settle_secs, 8);
        match cfg.roster {
            RosterConfig::Sheets {
                worksheet, token_env, ..
            } => {
                assert!(worksheet.is_none());
                assert_eq!(token_env, "SHEETS_TOKEN");
            }
            other => panic!("unexpected roster: {other:?}"),
        }
    }

    #[test]
    fn env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_vars(vars(&[
            ("WINDOW_DAYS", "5"),
            ("RECIPIENTS", " 5215550000001, ,5215550000002 "),
            ("PERSIST_DIR", "/var/lib/cumple"),
            ("HEADLESS", "FALSE"),
            ("SETTLE_SECS", "3"),
            ("RUN_TOKEN", "s3cret"),
            ("SHEET_ID", "sheet-1"),
            ("WORKSHEET_NAME", "Hoja1"),
        ]))
        .unwrap();

        assert_eq!(cfg.window_days, 5);
        assert_eq!(cfg.recipients, vec!["5215550000001", "5215550000002"]);
        assert_eq!(cfg.profile_dir(), PathBuf::from("/var/lib/cumple/chrome-profile"));
        assert!(!cfg.session.headless);
        assert_eq!(cfg.session.timing().settle, Duration::from_secs(3));
        assert_eq!(cfg.server.run_token.as_deref(), Some("s3cret"));
        assert_eq!(
            cfg.roster,
            RosterConfig::Sheets {
                spreadsheet_id: "sheet-1".into(),
                worksheet: Some("Hoja1".into()),
                token_env: "SHEETS_TOKEN".into(),
            }
        );
    }

    #[test]
    fn bad_number_in_env_is_config_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_vars(vars(&[("WINDOW_DAYS", "three")])).unwrap_err();
        assert!(matches!(err, CumpleError::Config(_)));
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_window_and_no_recipients() {
        let cfg = Config {
            window_days: 0,
            recipients: vec![],
            ..Config::default()
        };
        let warnings = cfg.validate();
        assert_eq!(
            warnings.iter().filter(|w| w.level == WarnLevel::Error).count(),
            2
        );
    }

    #[test]
    fn validate_flags_odd_recipient() {
        let cfg = Config {
            recipients: vec!["+5215550000000".into(), "ana@example.com".into()],
            ..Config::default()
        };
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("ana@example.com"));
    }
}
