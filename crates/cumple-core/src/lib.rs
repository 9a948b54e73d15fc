//! Birthday reminders over WhatsApp Web.
//!
//! A run reads the roster, finds birthdays inside the look-ahead window that
//! have not been announced this year, delivers one message per birthday to
//! every configured recipient and records the year in the roster's `Sent`
//! column.

pub mod config;
pub mod date;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod ledger;
pub mod message;
pub mod paths;
pub mod profile;
pub mod roster;
pub mod run_lock;
pub mod service;
pub mod session;
pub mod sheets;
pub mod webdriver;

pub use error::{CumpleError, Result};
