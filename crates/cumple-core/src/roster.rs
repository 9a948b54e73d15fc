//! The birthday roster: a header row plus data rows, addressed by position.
//!
//! Rows have no synthetic key. Data row `i` (0-based, header excluded) is the
//! identity used both to read an entry and to write its `Sent` cell back, so
//! the backing store must not be reordered between the two.

use crate::error::{CumpleError, Result};
use crate::ledger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Sheet
// ---------------------------------------------------------------------------

/// A raw tabular snapshot of the roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Cell text, or `""` when the row is shorter than `column`.
    pub fn cell(&self, row: usize, column: usize) -> Result<&str> {
        let cells = self.rows.get(row).ok_or(CumpleError::RowOutOfRange(row))?;
        Ok(cells.get(column).map(String::as_str).unwrap_or(""))
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()> {
        let cells = self
            .rows
            .get_mut(row)
            .ok_or(CumpleError::RowOutOfRange(row))?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value.to_string();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Column schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Role,
    Date,
    Sent,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Name, Field::Role, Field::Date, Field::Sent];

    /// Header spellings recognized for this field.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Name => &["Name", "Nombre"],
            Field::Role => &["Role", "Cargo"],
            Field::Date => &["Date", "Fecha"],
            Field::Sent => &["Sent", "Enviado"],
        }
    }

    pub fn label(self) -> &'static str {
        self.aliases()[0]
    }
}

/// Position of `field` in `headers`, if any alias matches.
pub fn find_column(headers: &[String], field: Field) -> Option<usize> {
    headers
        .iter()
        .position(|h| field.aliases().contains(&h.trim()))
}

/// Resolved column positions for every required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub name: usize,
    pub role: usize,
    pub date: usize,
    pub sent: usize,
}

impl Columns {
    pub fn resolve(headers: &[String]) -> Result<Self> {
        let found: Vec<Option<usize>> = Field::ALL
            .iter()
            .map(|f| find_column(headers, *f))
            .collect();
        let missing: Vec<String> = Field::ALL
            .iter()
            .zip(&found)
            .filter(|(_, idx)| idx.is_none())
            .map(|(f, _)| f.label().to_string())
            .collect();
        match found.as_slice() {
            [Some(name), Some(role), Some(date), Some(sent)] => Ok(Self {
                name: *name,
                role: *role,
                date: *date,
                sent: *sent,
            }),
            _ => Err(CumpleError::MissingColumns(missing)),
        }
    }
}

// ---------------------------------------------------------------------------
// RosterEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    /// Data row position (0-based, header excluded).
    pub row: usize,
    pub name: String,
    pub role: String,
    pub raw_date: String,
    /// Serialized sent-years field, e.g. `"2024,2025"`.
    pub sent: String,
}

impl RosterEntry {
    pub fn sent_years(&self) -> BTreeSet<i32> {
        ledger::parse_years(&self.sent)
    }

    /// Rows without a name or a date are not people to notify.
    pub fn is_blank(&self) -> bool {
        self.name.is_empty() || self.raw_date.is_empty()
    }
}

/// Project every data row of `sheet` onto the resolved columns, in stored order.
pub fn entries(sheet: &Sheet, columns: &Columns) -> Vec<RosterEntry> {
    let text = |cells: &[String], idx: usize| {
        cells
            .get(idx)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    sheet
        .rows
        .iter()
        .enumerate()
        .map(|(row, cells)| RosterEntry {
            row,
            name: text(cells, columns.name),
            role: text(cells, columns.role),
            raw_date: text(cells, columns.date),
            sent: text(cells, columns.sent),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RosterStore
// ---------------------------------------------------------------------------

/// Positional access to the backing roster.
pub trait RosterStore {
    fn load(&mut self) -> Result<Sheet>;

    fn read_cell(&mut self, row: usize, column: usize) -> Result<String>;

    fn write_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()>;
}

/// Roster kept in a YAML file (`headers:` + `rows:`).
pub struct FileRoster {
    path: PathBuf,
}

impl FileRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, sheet: &Sheet) -> Result<()> {
        let data = serde_yaml::to_string(sheet)?;
        crate::io::atomic_write(&self.path, data.as_bytes())
    }
}

impl RosterStore for FileRoster {
    fn load(&mut self) -> Result<Sheet> {
        if !self.path.exists() {
            return Err(CumpleError::Roster(format!(
                "roster file not found: {}",
                self.path.display()
            )));
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    fn read_cell(&mut self, row: usize, column: usize) -> Result<String> {
        Ok(self.load()?.cell(row, column)?.to_string())
    }

    fn write_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()> {
        let mut sheet = self.load()?;
        sheet.set_cell(row, column, value)?;
        self.save(&sheet)
    }
}

/// In-process roster. Clones share the same sheet.
#[derive(Debug, Clone, Default)]
pub struct MemoryRoster {
    sheet: Arc<Mutex<Sheet>>,
}

impl MemoryRoster {
    pub fn new(sheet: Sheet) -> Self {
        Self {
            sheet: Arc::new(Mutex::new(sheet)),
        }
    }

    pub fn snapshot(&self) -> Result<Sheet> {
        Ok(self.guard()?.clone())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Sheet>> {
        self.sheet
            .lock()
            .map_err(|_| CumpleError::Roster("roster lock poisoned".into()))
    }
}

impl RosterStore for MemoryRoster {
    fn load(&mut self) -> Result<Sheet> {
        self.snapshot()
    }

    fn read_cell(&mut self, row: usize, column: usize) -> Result<String> {
        Ok(self.guard()?.cell(row, column)?.to_string())
    }

    fn write_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()> {
        self.guard()?.set_cell(row, column, value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
