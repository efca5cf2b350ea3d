use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Timestamp format written by the submission form, e.g. `21/03/2024 14.05.33`.
const SHEET_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H.%M.%S";

/// Month key used for filtering, e.g. `2024-03`.
pub const MONTH_FORMAT: &str = "%Y-%m";

/// Column positions inside a submission row.
const TIMESTAMP_COLUMN: usize = 0;
const NAME_COLUMN: usize = 1;
const FILE_COLUMN: usize = 3;

/// One art submission and its associated remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub month: String,
    pub name: String,
    /// Original file name on Drive; set once the file is resolved in the cache.
    pub file_name: Option<String>,
    /// Location of the cached file on disk; set once the file is resolved.
    pub file_path: Option<PathBuf>,
}

impl Entry {
    pub fn new(id: impl Into<String>, month: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            month: month.into(),
            name: name.into(),
            file_name: None,
            file_path: None,
        }
    }

    /// Build an entry from a spreadsheet row.
    ///
    /// Returns `None` for rows that lack a name or a usable file reference.
    /// An unreadable timestamp falls back to the current month.
    pub fn from_row(row: &[String]) -> Option<Self> {
        let name = row.get(NAME_COLUMN)?.trim();
        let id = row.get(FILE_COLUMN).and_then(|link| extract_file_id(link))?;

        let timestamp = row.get(TIMESTAMP_COLUMN).map(String::as_str).unwrap_or_default();
        let month = match NaiveDateTime::parse_from_str(timestamp.trim(), SHEET_TIMESTAMP_FORMAT) {
            Ok(date) => date.format(MONTH_FORMAT).to_string(),
            Err(_) => {
                warn!(timestamp = timestamp, file_id = %id, "Unparsable submission timestamp, using current month");
                Local::now().format(MONTH_FORMAT).to_string()
            }
        };

        Some(Self::new(id, month, name))
    }
}

/// Pull the Drive file id out of a form answer.
///
/// Accepts `open?id=<id>` links, any link with an `id=` query parameter,
/// `/file/d/<id>/...` links, and bare ids. Multi-file answers are comma
/// separated; only the first file is used.
pub fn extract_file_id(link: &str) -> Option<String> {
    let first = link.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }

    let candidate = if let Some(pos) = first.find("id=") {
        first[pos + 3..].split(['&', '#']).next().unwrap_or_default()
    } else if let Some(pos) = first.find("/d/") {
        first[pos + 3..].split(['/', '?', '#']).next().unwrap_or_default()
    } else if first.contains('/') {
        ""
    } else {
        first
    };

    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| candidate.to_string())
}

/// Returns true when `month` looks like `YYYY-MM`.
pub fn is_valid_month(month: &str) -> bool {
    chrono::NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").is_ok()
        && month.len() == 7
}
