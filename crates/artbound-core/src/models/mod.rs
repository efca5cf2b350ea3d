//! Data models for art submissions.
//!
//! - `Entry`: one spreadsheet row and, once resolved, its cached file
//! - Helpers for extracting Drive file ids and validating month keys

pub mod entry;

pub use entry::{extract_file_id, is_valid_month, Entry, MONTH_FORMAT};
