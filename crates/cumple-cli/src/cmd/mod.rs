pub mod clear_locks;
pub mod config;
pub mod preview;
pub mod run;
pub mod serve;
pub mod warmup;

use anyhow::Context;
use chrono::NaiveDate;
use cumple_core::config::Config;
use cumple_core::service::Notifier;
use std::path::Path;

/// `cumple.yaml` with environment overrides applied.
pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    let mut config = Config::load(root).context("failed to load config")?;
    config
        .apply_env()
        .context("invalid environment override")?;
    Ok(config)
}

pub fn notifier(root: &Path, config: Config) -> anyhow::Result<Notifier> {
    Notifier::from_config(root, config).context("failed to set up notifier")
}

pub fn today_or(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}
