//! One reminder run: evaluate the roster, then deliver and record what is due.
//!
//! Entries are evaluated before any browser is started, so a run with nothing
//! due never touches the messaging session. Once dispatch starts, failures are
//! per entry: an entry that could not be delivered or recorded is reported and
//! the run moves on.

use crate::config::Config;
use crate::date::{days_until_next, parse_date, Occurrence, WindowPolicy};
use crate::error::Result;
use crate::ledger::{self, SendLedger};
use crate::message::render;
use crate::roster::{entries, Columns, RosterEntry, RosterStore};
use crate::session::{pause, Launcher, MessagingSession, SessionTiming};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// How one roster entry stands against today's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No name or no date.
    Blank,
    /// The date could not be read; carries the raw text.
    InvalidDate(String),
    OutsideWindow(Occurrence),
    AlreadySent(Occurrence),
    Due(Occurrence),
}

pub fn evaluate(entry: &RosterEntry, policy: WindowPolicy, today: NaiveDate) -> Verdict {
    if entry.is_blank() {
        return Verdict::Blank;
    }
    let date = match parse_date(&entry.raw_date) {
        Ok(d) => d,
        Err(_) => return Verdict::InvalidDate(entry.raw_date.clone()),
    };
    let next = days_until_next(date, today);
    if !policy.qualifies(next.days) {
        Verdict::OutsideWindow(next)
    } else if ledger::already_sent(&entry.sent, next.year) {
        Verdict::AlreadySent(next)
    } else {
        Verdict::Due(next)
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// Delivered to at least one recipient and recorded.
    Sent { date: String, year: i32, delivered: usize },
    AlreadySent { year: i32 },
    InvalidDate { raw: String },
    /// No recipient could be reached. Nothing recorded, so the next run retries.
    Undelivered { date: String },
    /// Delivered but the ledger write failed. The next run may resend.
    Unrecorded { date: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub row: usize,
    pub name: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Entries delivered and recorded.
    pub sent: usize,
    /// Entries in the window whose year was already recorded.
    pub skipped: usize,
    /// Entries no recipient received.
    pub failed: usize,
    /// Entries with an unreadable date.
    pub invalid: usize,
    /// Entries delivered whose ledger write failed.
    pub ledger_errors: usize,
    pub entries: Vec<EntryReport>,
}

impl RunSummary {
    fn record(&mut self, entry: &RosterEntry, outcome: EntryOutcome) {
        match &outcome {
            EntryOutcome::Sent { .. } => self.sent += 1,
            EntryOutcome::AlreadySent { .. } => self.skipped += 1,
            EntryOutcome::InvalidDate { .. } => self.invalid += 1,
            EntryOutcome::Undelivered { .. } => self.failed += 1,
            EntryOutcome::Unrecorded { .. } => self.ledger_errors += 1,
        }
        self.entries.push(EntryReport {
            row: entry.row,
            name: entry.name.clone(),
            outcome,
        });
    }

    /// One-line human summary, as returned by the trigger endpoint.
    pub fn message(&self) -> String {
        let mut msg = format!("sent {}, skipped {}", self.sent, self.skipped);
        if self.failed > 0 {
            msg.push_str(&format!(", undelivered {}", self.failed));
        }
        if self.ledger_errors > 0 {
            msg.push_str(&format!(", unrecorded {}", self.ledger_errors));
        }
        if self.invalid > 0 {
            msg.push_str(&format!(", invalid dates {}", self.invalid));
        }
        msg
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Everything a run needs besides the roster and the browser.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub policy: WindowPolicy,
    pub recipients: Vec<String>,
    pub template: String,
    pub timing: SessionTiming,
    /// Wait between two recipients of the same entry.
    pub recipient_pause: Duration,
    pub profile_dir: PathBuf,
    pub snapshot_path: Option<PathBuf>,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            policy: config.window()?,
            recipients: config.recipients.clone(),
            template: config.message_template.clone(),
            timing: config.session.timing(),
            recipient_pause: config.session.recipient_pause(),
            profile_dir: config.profile_dir(),
            snapshot_path: Some(config.snapshot_path()),
        })
    }

    pub(crate) fn session(&self) -> MessagingSession {
        let session = MessagingSession::new(self.timing.clone());
        match &self.snapshot_path {
            Some(path) => session.with_snapshot(path),
            None => session,
        }
    }
}

pub struct Dispatcher<'a> {
    settings: &'a DispatchSettings,
    store: &'a mut dyn RosterStore,
    launcher: &'a dyn Launcher,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        settings: &'a DispatchSettings,
        store: &'a mut dyn RosterStore,
        launcher: &'a dyn Launcher,
    ) -> Self {
        Self {
            settings,
            store,
            launcher,
        }
    }

    /// Run once for `today`.
    ///
    /// Errors are fatal to the whole run: unreadable roster, missing columns,
    /// a browser that would not start or a session that never became ready.
    /// The session is closed on every path.
    pub fn run(&mut self, today: NaiveDate) -> Result<RunSummary> {
        let sheet = self.store.load()?;
        let mut summary = RunSummary::default();
        if sheet.headers.is_empty() && sheet.is_empty() {
            info!("roster is empty, nothing to do");
            return Ok(summary);
        }
        let columns = Columns::resolve(&sheet.headers)?;

        let mut due = Vec::new();
        for entry in entries(&sheet, &columns) {
            match evaluate(&entry, self.settings.policy, today) {
                Verdict::Blank | Verdict::OutsideWindow(_) => {}
                Verdict::InvalidDate(raw) => {
                    warn!(row = entry.row, name = %entry.name, date = %raw, "skipping entry with invalid date");
                    summary.record(&entry, EntryOutcome::InvalidDate { raw });
                }
                Verdict::AlreadySent(next) => {
                    info!(name = %entry.name, year = next.year, "already sent this year");
                    summary.record(&entry, EntryOutcome::AlreadySent { year: next.year });
                }
                Verdict::Due(next) => due.push((entry, next)),
            }
        }

        if due.is_empty() {
            info!(window_days = self.settings.policy.window_days(), "no birthdays due");
            return Ok(summary);
        }
        info!(due = due.len(), "opening messaging session");

        let mut session = self.settings.session();
        session.open(self.launcher, &self.settings.profile_dir)?;
        session.ensure_ready()?;

        let mut ledger = SendLedger::new(&mut *self.store, &sheet.headers);
        for (mut entry, next) in due {
            let outcome = deliver(self.settings, &mut session, &mut ledger, &mut entry, &next);
            summary.record(&entry, outcome);
        }
        session.close();

        info!(
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            ledger_errors = summary.ledger_errors,
            "run finished"
        );
        Ok(summary)
    }
}

fn deliver(
    settings: &DispatchSettings,
    session: &mut MessagingSession,
    ledger: &mut SendLedger<'_>,
    entry: &mut RosterEntry,
    next: &Occurrence,
) -> EntryOutcome {
    let date = next.display_date();
    let message = render(&settings.template, &entry.name, &entry.role, &date);

    let mut delivered = 0;
    for (i, recipient) in settings.recipients.iter().enumerate() {
        if i > 0 {
            pause(settings.recipient_pause);
        }
        match session.send(recipient, &message) {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(e) => warn!(recipient = %recipient, error = %e, "send aborted"),
        }
    }

    if delivered == 0 {
        warn!(name = %entry.name, "no recipient reached, will retry next run");
        return EntryOutcome::Undelivered { date };
    }

    match ledger.mark_sent(entry, next.year) {
        Ok(()) => {
            info!(name = %entry.name, date = %date, delivered, "reminder sent");
            EntryOutcome::Sent {
                date,
                year: next.year,
                delivered,
            }
        }
        Err(e) => {
            warn!(name = %entry.name, error = %e, "reminder sent but not recorded");
            EntryOutcome::Unrecorded {
                date,
                error: e.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CumpleError;
    use crate::roster::{MemoryRoster, Sheet};
    use crate::session::testing::{FakeLauncher, FakeSurface};
    use tempfile::TempDir;

    /// Memory roster whose writes to one row always fail.
    struct ReadOnlyRow {
        inner: MemoryRoster,
        row: usize,
    }

    impl RosterStore for ReadOnlyRow {
        fn load(&mut self) -> Result<Sheet> {
            self.inner.load()
        }

        fn read_cell(&mut self, row: usize, column: usize) -> Result<String> {
            self.inner.read_cell(row, column)
        }

        fn write_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()> {
            if row == self.row {
                return Err(CumpleError::Roster("row is protected".into()));
            }
            self.inner.write_cell(row, column, value)
        }
    }

    const HEADERS: &[&str] = &["Name", "Role", "Date", "Sent"];

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn settings(dir: &TempDir, recipients: &[&str]) -> DispatchSettings {
        DispatchSettings {
            policy: WindowPolicy::new(3).unwrap(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            template: "{name}|{role}|{date}".into(),
            timing: SessionTiming::immediate(),
            recipient_pause: Duration::ZERO,
            profile_dir: dir.path().join("profile"),
            snapshot_path: None,
        }
    }

    fn sends(surface: &FakeSurface) -> Vec<String> {
        surface
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("navigate:https://web.whatsapp.com/send"))
            .collect()
    }

    #[test]
    fn leap_day_birthday_sent_on_feb_28() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "29/02/24", ""]));
        let surface = FakeSurface::ready_after(&[true]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["5215550000001"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 2, 28))
            .unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(
            summary.entries[0].outcome,
            EntryOutcome::Sent {
                date: "28/02/2025".into(),
                year: 2025,
                delivered: 1
            }
        );
        assert_eq!(store.snapshot().unwrap().rows[0][3], "2025");
        let sent = sends(&surface);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("phone=5215550000001"));
        assert!(sent[0].contains("Ana%7CDev%7C28%2F02%2F2025"));
        assert_eq!(surface.calls().last().map(String::as_str), Some("quit"));
    }

    #[test]
    fn already_sent_is_skipped_without_opening_session() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "29/02/24", "2025"]));
        let surface = FakeSurface::ready_after(&[true]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["5215550000001"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 2, 27))
            .unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.skipped, 1);
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn invalid_date_does_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        let sheet = Sheet::new(HEADERS)
            .with_row(&["Bad", "Ops", "31/13/25", ""])
            .with_row(&["Luis", "Ops", "16-03", ""])
            .with_row(&["", "", "", ""]);
        let mut store = MemoryRoster::new(sheet);
        let launcher = FakeLauncher::new(FakeSurface::ready_after(&[true]));
        let settings = settings(&dir, &["5215550000001"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();

        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.entries[0].outcome, EntryOutcome::InvalidDate { raw: "31/13/25".into() });
    }

    #[test]
    fn nothing_recorded_when_every_recipient_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "15/03", "2024"]));
        let surface = FakeSurface {
            unreachable: vec!["111".into(), "222".into()],
            ..FakeSurface::ready_after(&[true])
        };
        let launcher = FakeLauncher::new(surface);
        let settings = settings(&dir, &["111", "222"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.sent, 0);
        assert_eq!(store.snapshot().unwrap().rows[0][3], "2024");
    }

    #[test]
    fn one_reachable_recipient_is_enough() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "15/03", ""]));
        let surface = FakeSurface {
            unreachable: vec!["111".into()],
            ..FakeSurface::ready_after(&[true])
        };
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["111", "222"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 14))
            .unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(sends(&surface).len(), 2);
        assert_eq!(store.snapshot().unwrap().rows[0][3], "2025");
    }

    #[test]
    fn failed_ledger_write_is_reported_and_run_continues() {
        let dir = TempDir::new().unwrap();
        let sheet = Sheet::new(HEADERS)
            .with_row(&["Ana", "Dev", "15/03", ""])
            .with_row(&["Luis", "Ops", "16/03", ""]);
        let inner = MemoryRoster::new(sheet);
        let mut store = ReadOnlyRow {
            inner: inner.clone(),
            row: 0,
        };
        let surface = FakeSurface::ready_after(&[true]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["111"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.ledger_errors, 1);
        assert_eq!(sends(&surface).len(), 2);
        assert!(matches!(
            &summary.entries[0].outcome,
            EntryOutcome::Unrecorded { date, error } if date == "15/03/2025" && error.contains("row is protected")
        ));
        assert_eq!(summary.entries[1].name, "Luis");
        assert!(matches!(summary.entries[1].outcome, EntryOutcome::Sent { year: 2025, .. }));
        assert_eq!(summary.message(), "sent 1, skipped 0, unrecorded 1");

        let rows = inner.snapshot().unwrap().rows;
        assert_eq!(rows[0][3], "");
        assert_eq!(rows[1][3], "2025");
    }

    #[test]
    fn second_run_same_day_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "15/03", ""]));
        let surface = FakeSurface::ready_after(&[true, true]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["111"]);

        let first = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();
        let second = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();

        assert_eq!(first.sent, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(sends(&surface).len(), 1);
    }

    #[test]
    fn missing_columns_fail_before_launch() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(&["Name", "Date"]).with_row(&["Ana", "15/03"]));
        let surface = FakeSurface::ready_after(&[true]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["111"]);

        let err = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap_err();

        assert!(matches!(err, CumpleError::MissingColumns(_)));
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn empty_roster_is_an_empty_run() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::default());
        let launcher = FakeLauncher::new(FakeSurface::default());
        let settings = settings(&dir, &["111"]);

        let summary = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap();

        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn session_never_ready_is_fatal_and_closes() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryRoster::new(Sheet::new(HEADERS).with_row(&["Ana", "Dev", "15/03", ""]));
        let surface = FakeSurface::ready_after(&[false, false]);
        let launcher = FakeLauncher::new(surface.clone());
        let settings = settings(&dir, &["111"]);

        let err = Dispatcher::new(&settings, &mut store, &launcher)
            .run(ymd(2025, 3, 15))
            .unwrap_err();

        assert!(matches!(err, CumpleError::SessionFailed(_)));
        assert_eq!(surface.calls().last().map(String::as_str), Some("quit"));
        assert!(sends(&surface).is_empty());
        assert_eq!(store.snapshot().unwrap().rows[0][3], "");
    }

    #[test]
    fn evaluate_classifies_entries() {
        let policy = WindowPolicy::new(3).unwrap();
        let today = ymd(2025, 3, 15);
        let entry = |date: &str, sent: &str| RosterEntry {
            row: 0,
            name: "Ana".into(),
            role: "Dev".into(),
            raw_date: date.into(),
            sent: sent.into(),
        };

        assert!(matches!(evaluate(&entry("17/03", ""), policy, today), Verdict::Due(o) if o.days == 2));
        assert!(matches!(evaluate(&entry("18/03", ""), policy, today), Verdict::OutsideWindow(_)));
        assert!(matches!(evaluate(&entry("15/03", "2024 2025"), policy, today), Verdict::AlreadySent(_)));
        assert_eq!(evaluate(&entry("", ""), policy, today), Verdict::Blank);
        assert_eq!(
            evaluate(&entry("3/", ""), policy, today),
            Verdict::InvalidDate("3/".into())
        );
    }

    #[test]
    fn summary_message_mentions_failures_only_when_present() {
        let mut summary = RunSummary {
            sent: 2,
            skipped: 1,
            ..RunSummary::default()
        };
        assert_eq!(summary.message(), "sent 2, skipped 1");
        summary.failed = 1;
        assert_eq!(summary.message(), "sent 2, skipped 1, undelivered 1");
    }
}
