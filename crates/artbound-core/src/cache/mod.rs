//! Local file cache for submission artwork.
//!
//! Files live flat in one directory, named `<fileId>-_-_-_-_-_<originalName>`.
//! `CacheIndex` lists what is already on disk; `ArtCache` ties the index to the
//! entry list fetched from the spreadsheet and downloads files on demand.

pub mod index;
pub mod manager;

pub use index::{CacheIndex, CachedFile, FILENAME_SEPARATOR};
pub use manager::{
    ArtCache, CacheOrigin, CacheStatus, CachedData, DownloadFailure, EntryOutcome,
    RefreshSummary, Resolution, ResolvedEntry,
};
