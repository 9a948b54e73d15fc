//! The long-lived notifier shared by the HTTP server and the CLI.
//!
//! Owns the process-wide [`RunLock`]: runs and warm-ups are single-flight, and
//! a trigger that finds the lock held is rejected with
//! [`CumpleError::AlreadyRunning`] instead of waiting.

use crate::config::{Config, RosterConfig};
use crate::dispatch::{evaluate, DispatchSettings, Dispatcher, RunSummary, Verdict};
use crate::error::{CumpleError, Result};
use crate::profile::clear_profile_locks;
use crate::roster::{entries, Columns, FileRoster, RosterStore};
use crate::run_lock::{RunGuard, RunLock};
use crate::session::{Launcher, SessionState};
use crate::sheets::SheetsRoster;
use crate::webdriver::ChromeLauncher;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Factories for the two external collaborators of a run.
pub trait Services: Send + Sync {
    fn roster(&self) -> Result<Box<dyn RosterStore>>;

    fn launcher(&self) -> Result<Box<dyn Launcher>>;
}

/// Roster and browser as described by the project config.
pub struct LiveServices {
    root: PathBuf,
    config: Config,
}

impl LiveServices {
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }
}

impl Services for LiveServices {
    fn roster(&self) -> Result<Box<dyn RosterStore>> {
        match &self.config.roster {
            RosterConfig::File { path } => Ok(Box::new(FileRoster::new(self.root.join(path)))),
            RosterConfig::Sheets {
                spreadsheet_id,
                worksheet,
                token_env,
            } => Ok(Box::new(SheetsRoster::from_env(
                spreadsheet_id,
                worksheet.clone(),
                token_env,
            )?)),
        }
    }

    fn launcher(&self) -> Result<Box<dyn Launcher>> {
        Ok(Box::new(ChromeLauncher::new(self.config.launch_options())))
    }
}

// ---------------------------------------------------------------------------
// Upcoming
// ---------------------------------------------------------------------------

/// A birthday inside the window, as shown by a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upcoming {
    pub row: usize,
    pub name: String,
    pub role: String,
    pub date: String,
    pub days: i64,
    pub year: i32,
    pub already_sent: bool,
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Notifier {
    settings: Arc<DispatchSettings>,
    services: Arc<dyn Services>,
    lock: Arc<RunLock>,
}

impl Notifier {
    pub fn new(settings: DispatchSettings, services: Arc<dyn Services>) -> Self {
        Self {
            settings: Arc::new(settings),
            services,
            lock: Arc::new(RunLock::new()),
        }
    }

    /// Notifier wired to the live roster and browser of the project at `root`.
    pub fn from_config(root: &Path, config: Config) -> Result<Self> {
        let settings = DispatchSettings::from_config(&config)?;
        Ok(Self::new(settings, Arc::new(LiveServices::new(root, config))))
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.lock.is_held()
    }

    /// Take the run lock, or fail fast when another run or warm-up holds it.
    pub fn reserve(&self) -> Result<RunGuard> {
        self.lock.try_guard().ok_or(CumpleError::AlreadyRunning)
    }

    pub fn run(&self, today: NaiveDate) -> Result<RunSummary> {
        let guard = self.reserve()?;
        self.run_reserved(guard, today)
    }

    /// Run while holding `guard`. The lock is released when this returns.
    pub fn run_reserved(&self, _guard: RunGuard, today: NaiveDate) -> Result<RunSummary> {
        info!(%today, "run started");
        let mut roster = self.services.roster()?;
        let launcher = self.services.launcher()?;
        let result =
            Dispatcher::new(&self.settings, roster.as_mut(), launcher.as_ref()).run(today);
        if let Err(e) = &result {
            warn!(error = %e, "run aborted");
        }
        result
    }

    /// Open a session and wait for readiness, without sending anything.
    ///
    /// Used to pair the account: the readiness snapshot shows the pairing code.
    pub fn warmup(&self) -> Result<SessionState> {
        let guard = self.reserve()?;
        self.warmup_reserved(guard)
    }

    pub fn warmup_reserved(&self, _guard: RunGuard) -> Result<SessionState> {
        let launcher = self.services.launcher()?;
        let mut session = self.settings.session();
        session.open(launcher.as_ref(), &self.settings.profile_dir)?;
        let outcome = session.ensure_ready();
        let state = session.state();
        session.close();
        info!(%state, "warm-up finished");
        outcome.map(|()| state)
    }

    /// Birthdays inside the window for `today`, soonest first. Read-only.
    pub fn preview(&self, today: NaiveDate) -> Result<Vec<Upcoming>> {
        let mut roster = self.services.roster()?;
        let sheet = roster.load()?;
        if sheet.headers.is_empty() && sheet.is_empty() {
            return Ok(Vec::new());
        }
        let columns = Columns::resolve(&sheet.headers)?;
        let mut upcoming: Vec<Upcoming> = entries(&sheet, &columns)
            .into_iter()
            .filter_map(|entry| {
                let (next, already_sent) = match evaluate(&entry, self.settings.policy, today) {
                    Verdict::Due(next) => (next, false),
                    Verdict::AlreadySent(next) => (next, true),
                    _ => return None,
                };
                Some(Upcoming {
                    row: entry.row,
                    name: entry.name,
                    role: entry.role,
                    date: next.display_date(),
                    days: next.days,
                    year: next.year,
                    already_sent,
                })
            })
            .collect();
        upcoming.sort_by_key(|u| (u.days, u.row));
        Ok(upcoming)
    }

    /// PNG bytes of the last readiness snapshot, if one was taken.
    pub fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        match &self.settings.snapshot_path {
            Some(path) => crate::io::read_if_exists(path),
            None => Ok(None),
        }
    }

    /// Remove stale browser locks from the profile. Refused while a run is active.
    pub fn clear_locks(&self) -> Result<Vec<String>> {
        let _guard = self.reserve()?;
        Ok(clear_profile_locks(&self.settings.profile_dir))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::WindowPolicy;
    use crate::roster::{MemoryRoster, Sheet};
    use crate::session::testing::{FakeLauncher, FakeSurface};
    use crate::session::SessionTiming;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeServices {
        roster: MemoryRoster,
        surface: FakeSurface,
    }

    impl Services for FakeServices {
        fn roster(&self) -> Result<Box<dyn RosterStore>> {
            Ok(Box::new(self.roster.clone()))
        }

        fn launcher(&self) -> Result<Box<dyn Launcher>> {
            Ok(Box::new(FakeLauncher::new(self.surface.clone())))
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn notifier(dir: &TempDir, sheet: Sheet, surface: FakeSurface) -> (Notifier, MemoryRoster) {
        let roster = MemoryRoster::new(sheet);
        let settings = DispatchSettings {
            policy: WindowPolicy::new(3).unwrap(),
            recipients: vec!["5215550000001".into()],
            template: "{name} {date}".into(),
            timing: SessionTiming::immediate(),
            recipient_pause: Duration::ZERO,
            profile_dir: dir.path().join("profile"),
            snapshot_path: Some(dir.path().join("qr.png")),
        };
        let services = FakeServices {
            roster: roster.clone(),
            surface,
        };
        (Notifier::new(settings, Arc::new(services)), roster)
    }

    fn roster_sheet() -> Sheet {
        Sheet::new(&["Nombre", "Cargo", "Fecha", "Enviado"])
            .with_row(&["Luis", "Ops", "17/03/90", ""])
            .with_row(&["Ana", "Dev", "15/03/88", "2025"])
            .with_row(&["Eva", "QA", "01/06/91", ""])
    }

    #[test]
    fn run_sends_and_releases_lock() {
        let dir = TempDir::new().unwrap();
        let (notifier, roster) = notifier(&dir, roster_sheet(), FakeSurface::ready_after(&[true]));

        let summary = notifier.run(ymd(2025, 3, 15)).unwrap();

        assert_eq!((summary.sent, summary.skipped), (1, 1));
        assert!(!notifier.is_running());
        assert_eq!(roster.snapshot().unwrap().rows[0][3], "2025");
        assert!(notifier.snapshot().unwrap().is_some());
    }

    #[test]
    fn run_while_reserved_is_rejected() {
        let dir = TempDir::new().unwrap();
        let surface = FakeSurface::ready_after(&[true]);
        let (notifier, _) = notifier(&dir, roster_sheet(), surface.clone());

        let guard = notifier.reserve().unwrap();
        let clone = notifier.clone();
        assert!(matches!(clone.run(ymd(2025, 3, 15)), Err(CumpleError::AlreadyRunning)));
        assert!(matches!(clone.warmup(), Err(CumpleError::AlreadyRunning)));
        assert!(surface.calls().is_empty());

        drop(guard);
        assert!(notifier.run(ymd(2025, 3, 15)).is_ok());
    }

    #[test]
    fn failed_run_releases_lock() {
        let dir = TempDir::new().unwrap();
        let (notifier, _) = notifier(&dir, roster_sheet(), FakeSurface::ready_after(&[false, false]));

        assert!(matches!(
            notifier.run(ymd(2025, 3, 15)),
            Err(CumpleError::SessionFailed(_))
        ));
        assert!(!notifier.is_running());
    }

    #[test]
    fn warmup_probes_without_sending() {
        let dir = TempDir::new().unwrap();
        let surface = FakeSurface::ready_after(&[false, true]);
        let (notifier, roster) = notifier(&dir, roster_sheet(), surface.clone());

        assert_eq!(notifier.warmup().unwrap(), SessionState::Ready);

        let calls = surface.calls();
        assert!(calls.contains(&"reload".to_string()));
        assert!(!calls.iter().any(|c| c.contains("/send?")));
        assert_eq!(calls.last().map(String::as_str), Some("quit"));
        assert_eq!(roster.snapshot().unwrap(), roster_sheet());
    }

    #[test]
    fn preview_lists_window_soonest_first() {
        let dir = TempDir::new().unwrap();
        let surface = FakeSurface::default();
        let (notifier, _) = notifier(&dir, roster_sheet(), surface.clone());

        let upcoming = notifier.preview(ymd(2025, 3, 15)).unwrap();

        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].name, "Ana");
        assert!(upcoming[0].already_sent);
        assert_eq!(upcoming[1].name, "Luis");
        assert_eq!(upcoming[1].days, 2);
        assert_eq!(upcoming[1].date, "17/03/2025");
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn clear_locks_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("SingletonLock"), b"").unwrap();
        let (notifier, _) = notifier(&dir, roster_sheet(), FakeSurface::default());

        let guard = notifier.reserve().unwrap();
        assert!(matches!(notifier.clear_locks(), Err(CumpleError::AlreadyRunning)));
        drop(guard);

        assert_eq!(notifier.clear_locks().unwrap(), vec!["SingletonLock"]);
    }

    #[test]
    fn live_services_resolve_file_roster_against_root() {
        let dir = TempDir::new().unwrap();
        let sheet = roster_sheet();
        FileRoster::new(dir.path().join("roster.yaml"))
            .save(&sheet)
            .unwrap();

        let services = LiveServices::new(dir.path(), Config::default());
        assert_eq!(services.roster().unwrap().load().unwrap(), sheet);
    }
}
