//! Birthday date parsing and look-ahead window arithmetic.
//!
//! Roster dates are free-form day/month[/year] strings. The year, when present,
//! is ignored: a birthday recurs every year, so only the day/month pair is
//! kept and re-materialized against the year of the next occurrence.

use crate::error::{CumpleError, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Reference year used to validate day/month pairs. Leap, so 29/02 is accepted.
const REFERENCE_YEAR: i32 = 2000;

static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

fn separator_re() -> &'static Regex {
    SEPARATOR_RE.get_or_init(|| Regex::new(r"[.\- ]").expect("infallible: static pattern"))
}

// ---------------------------------------------------------------------------
// CalendarDate
// ---------------------------------------------------------------------------

/// A day/month pair that forms a real date in a leap year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    day: u32,
    month: u32,
}

impl CalendarDate {
    pub fn new(day: u32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day).is_none() {
            return Err(CumpleError::InvalidDate(format!("{day:02}/{month:02}")));
        }
        Ok(Self { day, month })
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn is_leap_day(&self) -> bool {
        self.day == 29 && self.month == 2
    }

    /// The concrete date this birthday falls on in `year`.
    ///
    /// 29/02 materializes as 28/02 in years without a leap day. The stored
    /// pair is never changed.
    pub fn in_year(&self, year: i32) -> NaiveDate {
        let (day, month) = if self.is_leap_day() && !is_leap_year(year) {
            (28, 2)
        } else {
            (self.day, self.month)
        };
        NaiveDate::from_ymd_opt(year, month, day)
            .expect("infallible: day/month validated against a leap year")
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}", self.day, self.month)
    }
}

impl FromStr for CalendarDate {
    type Err = CumpleError;

    fn from_str(s: &str) -> Result<Self> {
        parse_date(s)
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Parse `dd/mm/yy` or `dd/mm/yyyy`. `.`, `-` and spaces are accepted as
/// separators. The year component is discarded.
pub fn parse_date(raw: &str) -> Result<CalendarDate> {
    let trimmed = raw.trim();
    let normalized = separator_re().replace_all(trimmed, "/");
    let parts: Vec<&str> = normalized.split('/').collect();
    if parts.len() < 2 {
        return Err(CumpleError::InvalidDate(trimmed.to_string()));
    }
    let parse = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| CumpleError::InvalidDate(trimmed.to_string()))
    };
    let day = parse(parts[0])?;
    let month = parse(parts[1])?;
    CalendarDate::new(day, month).map_err(|_| CumpleError::InvalidDate(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Occurrence
// ---------------------------------------------------------------------------

/// The next time a birthday happens, seen from a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// Days from `today` to the occurrence. Zero means today.
    pub days: i64,
    /// Calendar year the occurrence falls in. This is the ledger key.
    pub year: i32,
    /// The materialized date, including the 29/02 → 28/02 substitution.
    pub date: NaiveDate,
}

impl Occurrence {
    /// `dd/mm/yyyy` of the materialized date.
    pub fn display_date(&self) -> String {
        self.date.format("%d/%m/%Y").to_string()
    }
}

/// Next occurrence of `date` on or after `today`.
pub fn days_until_next(date: CalendarDate, today: NaiveDate) -> Occurrence {
    let this_year = today.year();
    let candidate = date.in_year(this_year);
    let (date, year) = if candidate >= today {
        (candidate, this_year)
    } else {
        (date.in_year(this_year + 1), this_year + 1)
    };
    Occurrence {
        days: (date - today).num_days(),
        year,
        date,
    }
}

// ---------------------------------------------------------------------------
// WindowPolicy
// ---------------------------------------------------------------------------

/// How many days ahead (today included) an upcoming birthday is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    window_days: u32,
}

impl WindowPolicy {
    pub fn new(window_days: u32) -> Result<Self> {
        if window_days == 0 {
            return Err(CumpleError::Config("window_days must be at least 1".into()));
        }
        Ok(Self { window_days })
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Inclusive at 0, exclusive at `window_days`.
    pub fn qualifies(&self, days: i64) -> bool {
        (0..i64::from(self.window_days)).contains(&days)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
