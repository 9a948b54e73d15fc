use crate::output::{print_json, print_table};
use chrono::NaiveDate;
use cumple_core::dispatch::{EntryOutcome, RunSummary};
use std::path::Path;

pub fn run(root: &Path, date: Option<NaiveDate>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let notifier = super::notifier(root, config)?;
    let summary = notifier.run(super::today_or(date))?;

    if json {
        return print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if !summary.entries.is_empty() {
        let rows = summary
            .entries
            .iter()
            .map(|e| vec![(e.row + 2).to_string(), e.name.clone(), describe(&e.outcome)])
            .collect();
        print_table(&["ROW", "NAME", "OUTCOME"], rows);
        println!();
    }
    println!("{}", summary.message());
}

fn describe(outcome: &EntryOutcome) -> String {
    match outcome {
        EntryOutcome::Sent {
            date, delivered, ..
        } => format!("sent for {date} ({delivered} recipient(s))"),
        EntryOutcome::AlreadySent { year } => format!("already sent for {year}"),
        EntryOutcome::InvalidDate { raw } => format!("invalid date '{raw}'"),
        EntryOutcome::Undelivered { date } => format!("not delivered ({date}), will retry"),
        EntryOutcome::Unrecorded { date, error } => {
            format!("sent for {date} but not recorded: {error}")
        }
    }
}
