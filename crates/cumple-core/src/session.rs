//! Messaging session bootstrap and delivery.
//!
//! The messaging surface is a browser tab on WhatsApp Web. Pairing needs a
//! human to scan a code out of band, so readiness is probed for a bounded time
//! with a single reload and then given up on.
//!
//! ```text
//! NotStarted ──open──▶ AwaitingReadiness ──probe ok──▶ Ready
//!                              │
//!                              └──probe fails twice──▶ Failed
//! ```

use crate::error::{CumpleError, Result};
use crate::profile::clear_profile_locks;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LANDING_URL: &str = "https://web.whatsapp.com/";
pub const COMPOSE_URL: &str = "https://web.whatsapp.com/send";

/// Pairing code canvas, or the chat pane of an already paired session.
pub const READY_SELECTOR: &str = "canvas[aria-label='Scan me!'], canvas, #pane-side";
pub const SEND_BUTTON_XPATH: &str = "//button[@aria-label='Enviar' or @aria-label='Send']";
pub const EDITOR_XPATH: &str = "//div[@contenteditable='true' and starts-with(@data-tab,'1')]";

/// Readiness polls never wait less than this.
pub const MIN_READY_TIMEOUT: Duration = Duration::from_secs(20);
/// Added to the first poll window for the post-reload retry.
pub const RETRY_EXTENSION: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Surface / Launcher
// ---------------------------------------------------------------------------

/// A remote-controlled page of the messaging client.
pub trait Surface {
    fn navigate(&mut self, url: &str) -> Result<()>;

    fn reload(&mut self) -> Result<()>;

    /// Poll until an element matching `css` exists. `Ok(false)` on timeout.
    fn wait_for_css(&mut self, css: &str, timeout: Duration) -> Result<bool>;

    fn click_xpath(&mut self, xpath: &str) -> Result<()>;

    fn press_enter_xpath(&mut self, xpath: &str) -> Result<()>;

    fn screenshot_png(&mut self) -> Result<Vec<u8>>;

    fn quit(&mut self) -> Result<()>;
}

/// Starts a [`Surface`] bound to the durable profile directory.
pub trait Launcher {
    fn launch(&self) -> Result<Box<dyn Surface>>;
}

// ---------------------------------------------------------------------------
// SessionState / SessionTiming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    AwaitingReadiness,
    Ready,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::NotStarted => "not_started",
            SessionState::AwaitingReadiness => "awaiting_readiness",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// First readiness poll window, before clamping to [`MIN_READY_TIMEOUT`].
    pub ready_timeout: Duration,
    /// Wait after opening a compose view.
    pub settle: Duration,
    /// Wait after a delivery action.
    pub post_send: Duration,
    /// Wait after the readiness signal for the pairing code to finish painting.
    pub paint: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(12),
            settle: Duration::from_secs(8),
            post_send: Duration::from_millis(1500),
            paint: Duration::from_millis(1500),
        }
    }
}

impl SessionTiming {
    /// Zero waits, for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            ready_timeout: Duration::ZERO,
            settle: Duration::ZERO,
            post_send: Duration::ZERO,
            paint: Duration::ZERO,
        }
    }

    pub fn first_poll(&self) -> Duration {
        self.ready_timeout.max(MIN_READY_TIMEOUT)
    }

    pub fn second_poll(&self) -> Duration {
        self.first_poll() + RETRY_EXTENSION
    }
}

pub(crate) fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

/// `https://web.whatsapp.com/send?phone=…&text=…` with both values encoded.
pub fn compose_url(recipient: &str, message: &str) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        COMPOSE_URL,
        &[("phone", recipient), ("text", message)],
    )
    .map_err(|e| CumpleError::WebDriver(format!("bad compose url: {e}")))?;
    Ok(url.into())
}

// ---------------------------------------------------------------------------
// MessagingSession
// ---------------------------------------------------------------------------

pub struct MessagingSession {
    surface: Option<Box<dyn Surface>>,
    state: SessionState,
    timing: SessionTiming,
    snapshot_path: Option<PathBuf>,
}

impl MessagingSession {
    pub fn new(timing: SessionTiming) -> Self {
        Self {
            surface: None,
            state: SessionState::NotStarted,
            timing,
            snapshot_path: None,
        }
    }

    /// Where to store the readiness screenshot.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Clear stale profile locks, then start the surface.
    pub fn open(&mut self, launcher: &dyn Launcher, profile_dir: &Path) -> Result<()> {
        if self.state != SessionState::NotStarted {
            return Err(CumpleError::SessionNotReady(self.state.to_string()));
        }
        clear_profile_locks(profile_dir);
        match launcher.launch() {
            Ok(surface) => {
                self.surface = Some(surface);
                self.state = SessionState::AwaitingReadiness;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(CumpleError::SessionFailed(format!("could not start browser: {e}")))
            }
        }
    }

    /// Load the landing page and wait for the readiness signal, reloading once.
    ///
    /// A snapshot is attempted afterwards whatever the outcome.
    pub fn ensure_ready(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::AwaitingReadiness => {}
            other => return Err(CumpleError::SessionNotReady(other.to_string())),
        }
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| CumpleError::SessionNotReady(self.state.to_string()))?;

        let outcome = probe(surface.as_mut(), &self.timing);
        self.state = if outcome.is_ok() {
            SessionState::Ready
        } else {
            SessionState::Failed
        };
        info!(state = %self.state, "messaging session probed");
        self.snapshot();
        outcome
    }

    /// Deliver `message` to `recipient`.
    ///
    /// `Ok(false)` means neither the send button nor the Enter fallback worked;
    /// it is not an error so the caller can move on to the next recipient.
    pub fn send(&mut self, recipient: &str, message: &str) -> Result<bool> {
        if self.state != SessionState::Ready {
            return Err(CumpleError::SessionNotReady(self.state.to_string()));
        }
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| CumpleError::SessionNotReady(self.state.to_string()))?;

        let url = compose_url(recipient, message)?;
        if let Err(e) = surface.navigate(&url) {
            warn!(recipient, error = %e, "could not open chat");
            return Ok(false);
        }
        pause(self.timing.settle);

        if let Err(primary) = surface.click_xpath(SEND_BUTTON_XPATH) {
            debug!(recipient, error = %primary, "send button unavailable, trying Enter");
            if let Err(fallback) = surface.press_enter_xpath(EDITOR_XPATH) {
                warn!(recipient, error = %fallback, "delivery failed");
                return Ok(false);
            }
        }
        pause(self.timing.post_send);
        Ok(true)
    }

    /// Release the surface. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            if let Err(e) = surface.quit() {
                warn!(error = %e, "error closing messaging session");
            }
        }
    }

    fn snapshot(&mut self) {
        let (Some(path), Some(surface)) = (&self.snapshot_path, self.surface.as_mut()) else {
            return;
        };
        match surface.screenshot_png() {
            Ok(png) => match crate::io::atomic_write(path, &png) {
                Ok(()) => debug!(path = %path.display(), "session snapshot saved"),
                Err(e) => warn!(error = %e, "could not save session snapshot"),
            },
            Err(e) => warn!(error = %e, "could not capture session snapshot"),
        }
    }
}

impl Drop for MessagingSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn probe(surface: &mut dyn Surface, timing: &SessionTiming) -> Result<()> {
    surface
        .navigate(LANDING_URL)
        .map_err(|e| CumpleError::SessionFailed(format!("could not load {LANDING_URL}: {e}")))?;

    if wait_once(surface, timing.first_poll(), timing.paint) {
        return Ok(());
    }

    info!("readiness signal not seen, reloading once");
    if let Err(e) = surface.reload() {
        debug!(error = %e, "reload failed, navigating again");
        surface.navigate(LANDING_URL).map_err(|e| {
            CumpleError::SessionFailed(format!("could not reload {LANDING_URL}: {e}"))
        })?;
    }

    if wait_once(surface, timing.second_poll(), timing.paint) {
        return Ok(());
    }
    Err(CumpleError::SessionFailed(format!(
        "no readiness signal after {}s and {}s",
        timing.first_poll().as_secs(),
        timing.second_poll().as_secs()
    )))
}

fn wait_once(surface: &mut dyn Surface, timeout: Duration, paint: Duration) -> bool {
    match surface.wait_for_css(READY_SELECTOR, timeout) {
        Ok(true) => {
            pause(paint);
            true
        }
        Ok(false) => false,
        Err(e) => {
            debug!(error = %e, "readiness poll errored");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
