use crate::output::{print_json, print_table};
use chrono::NaiveDate;
use std::path::Path;

pub fn run(root: &Path, date: Option<NaiveDate>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let window = config.window_days;
    let notifier = super::notifier(root, config)?;
    let today = super::today_or(date);
    let upcoming = notifier.preview(today)?;

    if json {
        return print_json(&upcoming);
    }
    if upcoming.is_empty() {
        println!("No birthdays in the next {window} day(s) from {today}.");
        return Ok(());
    }
    let rows = upcoming
        .into_iter()
        .map(|u| {
            let when = match u.days {
                0 => "today".to_string(),
                1 => "tomorrow".to_string(),
                n => format!("in {n} days"),
            };
            let status = if u.already_sent { "sent" } else { "pending" };
            vec![u.name, u.role, u.date, when, status.to_string()]
        })
        .collect();
    print_table(&["NAME", "ROLE", "DATE", "WHEN", "STATUS"], rows);
    Ok(())
}
