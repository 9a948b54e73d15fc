//! Google Sheets roster backend (Sheets API v4, values endpoints).
//!
//! Data row `i` lives on sheet row `i + 2`: row 1 holds the headers and the
//! API counts from 1.

use crate::error::{CumpleError, Result};
use crate::roster::{RosterStore, Sheet};
use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `0 → A`, `25 → Z`, `26 → AA`.
pub fn column_letter(column: usize) -> String {
    let mut n = column + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// A1 reference of a data cell in `worksheet`.
pub fn a1_cell(worksheet: &str, row: usize, column: usize) -> String {
    format!("{}!{}{}", quote_title(worksheet), column_letter(column), row + 2)
}

fn quote_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_rows(payload: &Value) -> Vec<Vec<String>> {
    payload["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_text).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// SheetsRoster
// ---------------------------------------------------------------------------

pub struct SheetsRoster {
    client: Client,
    base: String,
    spreadsheet_id: String,
    /// Resolved lazily to the first worksheet's title when not configured.
    worksheet: Option<String>,
    token: String,
}

impl SheetsRoster {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        worksheet: Option<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base: SHEETS_API.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet,
            token: token.into(),
        })
    }

    /// Build with the access token read from the `token_env` variable.
    pub fn from_env(spreadsheet_id: &str, worksheet: Option<String>, token_env: &str) -> Result<Self> {
        let token = std::env::var(token_env).map_err(|_| {
            CumpleError::Config(format!("access token variable '{token_env}' is not set"))
        })?;
        Self::new(spreadsheet_id, worksheet, token)
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| CumpleError::Config(format!("bad sheets url '{}': {e}", self.base)))?;
        url.path_segments_mut()
            .map_err(|_| CumpleError::Config(format!("bad sheets url '{}'", self.base)))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    fn send(&self, req: reqwest::blocking::RequestBuilder) -> Result<Value> {
        let resp = req.bearer_auth(&self.token).send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            return Err(CumpleError::Roster(format!(
                "sheets api returned {status}: {message}"
            )));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn worksheet(&mut self) -> Result<String> {
        if let Some(title) = &self.worksheet {
            return Ok(title.clone());
        }
        let mut url = self.url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let meta = self.send(self.client.get(url))?;
        let title = meta["sheets"][0]["properties"]["title"]
            .as_str()
            .ok_or_else(|| CumpleError::Roster("spreadsheet has no worksheets".into()))?
            .to_string();
        debug!(worksheet = %title, "resolved first worksheet");
        self.worksheet = Some(title.clone());
        Ok(title)
    }

    fn get_range(&mut self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url(&["values", range])?;
        let payload = self.send(self.client.get(url))?;
        Ok(value_rows(&payload))
    }
}

impl RosterStore for SheetsRoster {
    fn load(&mut self) -> Result<Sheet> {
        let title = self.worksheet()?;
        let mut rows = self.get_range(&quote_title(&title))?.into_iter();
        let headers = rows.next().unwrap_or_default();
        let sheet = Sheet {
            headers,
            rows: rows.collect(),
        };
        debug!(rows = sheet.rows.len(), "roster loaded from sheets");
        Ok(sheet)
    }

    fn read_cell(&mut self, row: usize, column: usize) -> Result<String> {
        let title = self.worksheet()?;
        let values = self.get_range(&a1_cell(&title, row, column))?;
        Ok(values
            .first()
            .and_then(|r| r.first())
            .cloned()
            .unwrap_or_default())
    }

    fn write_cell(&mut self, row: usize, column: usize, value: &str) -> Result<()> {
        let title = self.worksheet()?;
        let range = a1_cell(&title, row, column);
        let mut url = self.url(&["values", range.as_str()])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [[value]],
        });
        self.send(self.client.put(url).json(&body))?;
        debug!(range = %range, "sheet cell updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
