//! Utility functions for display formatting and file naming.

pub mod format;

pub use format::{age_display, format_timestamp, sanitize_file_name};
