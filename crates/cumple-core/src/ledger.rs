//! Per-entry record of the years a birthday has already been announced.
//!
//! The record lives in the roster's `Sent` cell as a comma/whitespace
//! separated list of years, e.g. `"2024, 2025"`.

use crate::error::{CumpleError, Result};
use crate::roster::{find_column, Field, RosterEntry, RosterStore};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

static TOKEN_SPLIT_RE: OnceLock<Regex> = OnceLock::new();

fn token_split_re() -> &'static Regex {
    TOKEN_SPLIT_RE.get_or_init(|| Regex::new(r"[,\s]+").expect("infallible: static pattern"))
}

fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    token_split_re()
        .split(raw.trim())
        .filter(|t| !t.is_empty())
}

/// Years listed in a serialized sent field. Tokens that are not integers are ignored.
pub fn parse_years(raw: &str) -> BTreeSet<i32> {
    tokens(raw).filter_map(|t| t.parse().ok()).collect()
}

/// Whether `year` appears among the integer tokens of `raw`.
pub fn already_sent(raw: &str, year: i32) -> bool {
    tokens(raw)
        .filter_map(|t| t.parse::<i32>().ok())
        .any(|y| y == year)
}

/// `raw` with `year` appended, or `None` when it is already recorded.
pub fn with_year(raw: &str, year: i32) -> Option<String> {
    if already_sent(raw, year) {
        return None;
    }
    let current = raw.trim();
    if current.is_empty() {
        Some(year.to_string())
    } else {
        Some(format!("{current},{year}"))
    }
}

// ---------------------------------------------------------------------------
// SendLedger
// ---------------------------------------------------------------------------

/// The only writer of the `Sent` column.
pub struct SendLedger<'a> {
    store: &'a mut dyn RosterStore,
    sent_column: Option<usize>,
}

impl<'a> SendLedger<'a> {
    pub fn new(store: &'a mut dyn RosterStore, headers: &[String]) -> Self {
        Self {
            store,
            sent_column: find_column(headers, Field::Sent),
        }
    }

    pub fn already_sent(&self, entry: &RosterEntry, year: i32) -> bool {
        already_sent(&entry.sent, year)
    }

    /// Record `year` for `entry`, in the store and on the entry itself.
    ///
    /// The live cell is re-read before writing so a concurrent manual edit is
    /// extended rather than overwritten. Recording an existing year is a no-op.
    pub fn mark_sent(&mut self, entry: &mut RosterEntry, year: i32) -> Result<()> {
        let column = self.sent_column.ok_or(CumpleError::MissingSentColumn)?;
        let current = self
            .store
            .read_cell(entry.row, column)
            .map_err(|e| CumpleError::Ledger(e.to_string()))?;
        let Some(updated) = with_year(&current, year) else {
            entry.sent = current;
            return Ok(());
        };
        self.store
            .write_cell(entry.row, column, &updated)
            .map_err(|e| CumpleError::Ledger(e.to_string()))?;
        debug!(row = entry.row, year, sent = %updated, "ledger updated");
        entry.sent = updated;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
