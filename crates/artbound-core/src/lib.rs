//! artbound core library.
//!
//! Keeps a local directory of artwork files in sync with the submissions listed
//! in a Google spreadsheet:
//!
//! - `api`: the `ArtSource` capability and its Sheets/Drive implementation
//! - `auth`: OAuth client secrets and token refresh
//! - `cache`: the cache directory index and the `ArtCache` context object
//! - `models`: submission entries parsed from spreadsheet rows
//! - `config`: environment based configuration

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod utils;

pub use api::{ArtSource, GoogleClient, SheetRow};
pub use cache::{ArtCache, CacheOrigin, DownloadFailure, RefreshSummary, Resolution};
pub use config::Config;
pub use error::{CacheError, ConfigError};
pub use models::Entry;
