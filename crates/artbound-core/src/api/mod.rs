//! Remote access to the submission spreadsheet and the uploaded files.
//!
//! `ArtSource` is the capability the cache consumes. `GoogleClient` is the
//! production implementation talking to the Sheets v4 and Drive v3 REST APIs
//! with an OAuth bearer token from `crate::auth`.

pub mod client;
pub mod error;
pub mod source;

pub use client::GoogleClient;
pub use error::ApiError;
pub use source::{ArtSource, SheetRow};
