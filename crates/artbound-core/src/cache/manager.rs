use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::ArtSource;
use crate::error::{CacheError, Result};
use crate::models::Entry;
use crate::utils::{age_display, format_timestamp, sanitize_file_name};

use super::index::{cache_file_name, original_name_of, partial_file_name, CacheIndex};

/// The entry list together with the time it was fetched.
#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        age_display(self.cached_at)
    }
}

/// Result of a successful refresh, in the shape the front-end expects.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    #[serde(rename = "timestamp")]
    pub last_updated: String,
    /// Size delta between the new and the previous entry list.
    #[serde(rename = "new")]
    pub new_entries: i64,
}

/// Where a resolved file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    Hit,
    Downloaded,
}

/// An entry whose file is present in the cache.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry: Entry,
    pub origin: CacheOrigin,
}

/// An entry whose file could not be downloaded.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadFailure {
    pub id: String,
    pub name: String,
    pub reason: String,
}

pub type EntryOutcome = std::result::Result<ResolvedEntry, DownloadFailure>;

/// Per-entry outcomes of resolving one month, in spreadsheet order.
#[derive(Debug, Default)]
pub struct Resolution {
    pub outcomes: Vec<EntryOutcome>,
}

impl Resolution {
    /// Entries whose files are on disk.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok())
            .map(|r| &r.entry)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DownloadFailure> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    pub fn downloaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Ok(r) if r.origin == CacheOrigin::Downloaded))
            .count()
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.outcomes
            .into_iter()
            .filter_map(|o| o.ok())
            .map(|r| r.entry)
            .collect()
    }
}

/// Shared cache state: the current entry list, the cache directory index and
/// the remote source used to fill both.
///
/// The entry snapshot is behind an `RwLock` and is only write-locked to swap in
/// a freshly fetched list. The index is behind a `Mutex` held for the whole
/// check/download/record sequence, so writers to the cache directory are
/// serialized.
pub struct ArtCache {
    source: Arc<dyn ArtSource>,
    snapshot: RwLock<CachedData<Vec<Entry>>>,
    index: Mutex<CacheIndex>,
}

impl ArtCache {
    /// Index `cache_dir` and start with an empty entry list.
    pub fn new(source: Arc<dyn ArtSource>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let index = CacheIndex::scan(cache_dir)?;
        Ok(Self {
            source,
            snapshot: RwLock::new(CachedData::new(Vec::new())),
            index: Mutex::new(index),
        })
    }

    /// Replace the entry list with the current spreadsheet contents.
    ///
    /// On failure the previous list and timestamp are kept.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let rows = self
            .source
            .fetch_rows()
            .await
            .context("Could not fetch spreadsheet rows")
            .map_err(CacheError::Fetch)?;

        let total_rows = rows.len();
        let entries: Vec<Entry> = rows.iter().filter_map(|row| Entry::from_row(row)).collect();
        if entries.len() < total_rows {
            warn!(skipped = total_rows - entries.len(), "Skipped malformed spreadsheet rows");
        }

        let mut snapshot = self.snapshot.write().await;
        let new_entries = entries.len() as i64 - snapshot.data.len() as i64;
        *snapshot = CachedData::new(entries);

        info!(entries = snapshot.data.len(), new = new_entries, "Entries refreshed");
        Ok(RefreshSummary {
            last_updated: format_timestamp(snapshot.cached_at),
            new_entries,
        })
    }

    /// Entries for `month` with their files present in the cache directory,
    /// downloading any that are missing.
    pub async fn resolve(&self, month: &str) -> Result<Resolution> {
        let matching: Vec<Entry> = {
            let snapshot = self.snapshot.read().await;
            snapshot
                .data
                .iter()
                .filter(|e| e.month == month)
                .cloned()
                .collect()
        };

        let mut index = self.index.lock().await;
        let dir = index.dir().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let mut resolution = Resolution::default();
        for mut entry in matching {
            let cached = match index.lookup(&entry.id) {
                Some(file_name) if dir.join(&file_name).is_file() => Some(file_name),
                Some(file_name) => {
                    warn!(file_id = %entry.id, file = %file_name, "Cached file vanished from disk");
                    index.forget(&entry.id);
                    None
                }
                None => None,
            };
            let (file_name, origin) = match cached {
                Some(file_name) => {
                    debug!(file_id = %entry.id, "File is cached");
                    (file_name, CacheOrigin::Hit)
                }
                None => {
                    info!(file_id = %entry.id, "File is not cached, downloading");
                    match self.download(&entry.id, &dir).await {
                        Ok(file_name) => {
                            index.record(&file_name);
                            (file_name, CacheOrigin::Downloaded)
                        }
                        Err(e) => {
                            let reason = format!("{:#}", e);
                            warn!(file_id = %entry.id, error = %reason, "Could not download file");
                            resolution.outcomes.push(Err(DownloadFailure {
                                id: entry.id,
                                name: entry.name,
                                reason,
                            }));
                            continue;
                        }
                    }
                }
            };

            entry.file_name = Some(original_name_of(&file_name).to_string());
            entry.file_path = Some(dir.join(&file_name));
            resolution.outcomes.push(Ok(ResolvedEntry { entry, origin }));
        }

        info!(
            month = month,
            resolved = resolution.entries().count(),
            downloaded = resolution.downloaded(),
            failed = resolution.failures().count(),
            "Resolved entries"
        );
        Ok(resolution)
    }

    /// Remove every cached file. Subsequent resolutions download again.
    pub async fn clear(&self) -> Result<()> {
        self.index.lock().await.clear()
    }

    /// Fetch a remote file into `dir`, returning its cache file name.
    ///
    /// Content goes to a hidden `.part` file first and is renamed into place,
    /// so an interrupted download never looks like a cached file.
    async fn download(&self, file_id: &str, dir: &Path) -> anyhow::Result<String> {
        let remote_name = self.source.file_name(file_id).await?;
        let file_name = cache_file_name(file_id, &sanitize_file_name(&remote_name));
        let bytes = self.source.download(file_id).await?;

        let path = dir.join(&file_name);
        let partial = dir.join(partial_file_name(&file_name));
        tokio::fs::write(&partial, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e).with_context(|| format!("Failed to move download into {}", path.display()));
        }

        debug!(file_id = file_id, bytes = bytes.len(), path = %path.display(), "Downloaded file");
        Ok(file_name)
    }

    pub async fn last_updated(&self) -> DateTime<Utc> {
        self.snapshot.read().await.cached_at
    }

    /// Never waits on a running resolve or clear: the cached file count is
    /// left out while the index is busy.
    pub async fn status(&self) -> CacheStatus {
        let (last_updated, age, entries) = {
            let snapshot = self.snapshot.read().await;
            (
                format_timestamp(snapshot.cached_at),
                snapshot.age_display(),
                snapshot.data.len(),
            )
        };
        CacheStatus {
            last_updated,
            age,
            entries,
            cached_files: self.index.try_lock().ok().map(|index| index.len()),
        }
    }

    pub async fn entries(&self) -> Vec<Entry> {
        self.snapshot.read().await.data.clone()
    }
}

/// Summary of the cache for the index page.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub last_updated: String,
    pub age: String,
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_files: Option<usize>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::api::SheetRow;

    /// In-memory source: rows plus remote files keyed by id.
    #[derive(Default)]
    struct FakeSource {
        rows: StdMutex<Option<Vec<SheetRow>>>,
        files: HashMap<String, (String, Vec<u8>)>,
        downloads: AtomicUsize,
    }

    impl FakeSource {
        fn with_rows(rows: Vec<SheetRow>) -> Self {
            Self {
                rows: StdMutex::new(Some(rows)),
                ..Default::default()
            }
        }

        fn file(mut self, id: &str, name: &str) -> Self {
            self.files
                .insert(id.to_string(), (name.to_string(), format!("content of {}", id).into_bytes()));
            self
        }

        /// Make subsequent `fetch_rows` calls fail.
        fn go_offline(&self) {
            *self.rows.lock().unwrap() = None;
        }

        fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtSource for FakeSource {
        async fn fetch_rows(&self) -> anyhow::Result<Vec<SheetRow>> {
            self.rows
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("spreadsheet unavailable"))
        }

        async fn file_name(&self, file_id: &str) -> anyhow::Result<String> {
            self.files
                .get(file_id)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| anyhow!("file {} not found", file_id))
        }

        async fn download(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(file_id)
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| anyhow!("file {} not found", file_id))
        }
    }

    fn row(timestamp: &str, name: &str, id: &str) -> SheetRow {
        vec![
            timestamp.to_string(),
            name.to_string(),
            String::new(),
            format!("https://drive.google.com/open?id={}", id),
        ]
    }

    fn sample_source() -> FakeSource {
        FakeSource::with_rows(vec![
            row("03/01/2024 10.00.00", "Alice", "A"),
            row("15/02/2024 18.30.00", "Bob", "B"),
        ])
        .file("A", "sunset.png")
        .file("B", "forest.jpg")
    }

    async fn setup(source: FakeSource) -> (TempDir, Arc<FakeSource>, ArtCache) {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(source);
        let cache = ArtCache::new(source.clone(), tmp.path().join("art")).unwrap();
        cache.refresh().await.unwrap();
        (tmp, source, cache)
    }

    #[tokio::test]
    async fn test_resolve_downloads_only_matching_month() {
        let (tmp, source, cache) = setup(sample_source()).await;

        let resolution = cache.resolve("2024-01").await.unwrap();
        let entries = resolution.into_entries();

        assert_eq!(source.downloads(), 1);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, "A");
        assert_eq!(entry.file_name.as_deref(), Some("sunset.png"));
        let expected = tmp.path().join("art").join("A-_-_-_-_-_sunset.png");
        assert_eq!(entry.file_path.as_deref(), Some(expected.as_path()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"content of A");
        assert!(!tmp.path().join("art").join("B-_-_-_-_-_forest.jpg").exists());
    }

    #[tokio::test]
    async fn test_second_resolve_is_cache_hit() {
        let (_tmp, source, cache) = setup(sample_source()).await;

        let first = cache.resolve("2024-02").await.unwrap();
        assert_eq!(first.downloaded(), 1);

        let second = cache.resolve("2024-02").await.unwrap();
        assert_eq!(second.downloaded(), 0);
        assert_eq!(source.downloads(), 1);
        assert!(matches!(
            second.outcomes.as_slice(),
            [Ok(ResolvedEntry { origin: CacheOrigin::Hit, .. })]
        ));
        assert_eq!(
            first.entries().next().unwrap().file_path,
            second.entries().next().unwrap().file_path
        );
    }

    #[tokio::test]
    async fn test_clear_forces_download_again() {
        let (tmp, source, cache) = setup(sample_source()).await;
        cache.resolve("2024-01").await.unwrap();
        cache.resolve("2024-02").await.unwrap();
        assert_eq!(source.downloads(), 2);

        cache.clear().await.unwrap();
        let remaining = std::fs::read_dir(tmp.path().join("art")).unwrap().count();
        assert_eq!(remaining, 0);

        let resolution = cache.resolve("2024-01").await.unwrap();
        assert_eq!(resolution.downloaded(), 1);
        assert_eq!(source.downloads(), 3);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_entries() {
        let (_tmp, source, cache) = setup(sample_source()).await;
        let before = cache.entries().await;
        let updated_at = cache.last_updated().await;

        source.go_offline();
        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));

        assert_eq!(cache.entries().await, before);
        assert_eq!(cache.last_updated().await, updated_at);
    }

    #[tokio::test]
    async fn test_refresh_counts_new_entries() {
        let source = FakeSource::with_rows(vec![row("03/01/2024 10.00.00", "Alice", "A")]);
        let (_tmp, source, cache) = setup(source).await;
        assert_eq!(cache.entries().await.len(), 1);

        *source.rows.lock().unwrap() = Some(vec![
            row("03/01/2024 10.00.00", "Alice", "A"),
            row("04/01/2024 11.00.00", "Carol", "C"),
            vec!["broken".to_string()],
        ]);
        let summary = cache.refresh().await.unwrap();
        assert_eq!(summary.new_entries, 1);
        assert_eq!(cache.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_download_is_reported_per_entry() {
        let source = FakeSource::with_rows(vec![
            row("03/01/2024 10.00.00", "Alice", "A"),
            row("05/01/2024 10.00.00", "Ghost", "MISSING"),
        ])
        .file("A", "sunset.png");
        let (tmp, _source, cache) = setup(source).await;

        let resolution = cache.resolve("2024-01").await.unwrap();
        assert_eq!(resolution.outcomes.len(), 2);

        let failures: Vec<_> = resolution.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "MISSING");
        assert_eq!(failures[0].name, "Ghost");

        let entries: Vec<_> = resolution.entries().collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].file_path.as_ref().unwrap().exists());

        // The failed id must not be treated as cached afterwards
        assert_eq!(cache.index.lock().await.lookup("MISSING"), None);
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("art"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("MISSING"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_preexisting_files_are_cache_hits() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("art");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("A-_-_-_-_-_old name.png"), b"old").unwrap();

        let source = Arc::new(sample_source());
        let cache = ArtCache::new(source.clone(), &dir).unwrap();
        cache.refresh().await.unwrap();

        let entries = cache.resolve("2024-01").await.unwrap().into_entries();
        assert_eq!(source.downloads(), 0);
        assert_eq!(entries[0].file_name.as_deref(), Some("old name.png"));
        assert_eq!(entries[0].file_path.as_deref(), Some(dir.join("A-_-_-_-_-_old name.png").as_path()));
    }

    #[tokio::test]
    async fn test_resolve_unknown_month_is_empty() {
        let (_tmp, source, cache) = setup(sample_source()).await;
        let resolution = cache.resolve("1999-12").await.unwrap();
        assert!(resolution.outcomes.is_empty());
        assert_eq!(source.downloads(), 0);
    }

    #[tokio::test]
    async fn test_remote_name_is_sanitized() {
        let source = FakeSource::with_rows(vec![row("03/01/2024 10.00.00", "Eve", "E")])
            .file("E", "../escape.png");
        let (tmp, _source, cache) = setup(source).await;

        let entries = cache.resolve("2024-01").await.unwrap().into_entries();
        let path = entries[0].file_path.clone().unwrap();
        assert_eq!(path.parent(), Some(tmp.path().join("art").as_path()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_status() {
        let (_tmp, _source, cache) = setup(sample_source()).await;
        cache.resolve("2024-01").await.unwrap();
        let status = cache.status().await;
        assert_eq!(status.entries, 2);
        assert_eq!(status.cached_files, Some(1));
        assert_eq!(status.age, "just now");
    }

    #[tokio::test]
    async fn test_status_does_not_wait_for_index() {
        let (_tmp, _source, cache) = setup(sample_source()).await;
        let _busy = cache.index.lock().await;

        let status = tokio::time::timeout(std::time::Duration::from_secs(1), cache.status())
            .await
            .expect("status blocked on the index lock");
        assert_eq!(status.entries, 2);
        assert_eq!(status.cached_files, None);
    }

    #[tokio::test]
    async fn test_part_named_file_is_cached_once() {
        let source = FakeSource::with_rows(vec![row("03/01/2024 10.00.00", "Dan", "D")])
            .file("D", "sketch.part");
        let (tmp, source, cache) = setup(source).await;

        let first = cache.resolve("2024-01").await.unwrap();
        assert_eq!(first.downloaded(), 1);
        let second = cache.resolve("2024-01").await.unwrap();
        assert_eq!(second.downloaded(), 0);
        assert_eq!(source.downloads(), 1);

        let entry = second.entries().next().unwrap();
        assert_eq!(entry.file_name.as_deref(), Some("sketch.part"));
        assert!(entry.file_path.as_ref().unwrap().exists());

        // Survives a restart too
        let reopened = ArtCache::new(source.clone(), tmp.path().join("art")).unwrap();
        assert_eq!(reopened.index.lock().await.lookup("D").as_deref(), Some("D-_-_-_-_-_sketch.part"));
    }

    #[tokio::test]
    async fn test_vanished_file_is_downloaded_again() {
        let (_tmp, source, cache) = setup(sample_source()).await;
        let first = cache.resolve("2024-01").await.unwrap().into_entries();
        let path = first[0].file_path.clone().unwrap();
        std::fs::remove_file(&path).unwrap();

        let second = cache.resolve("2024-01").await.unwrap();
        assert_eq!(second.downloaded(), 1);
        assert_eq!(source.downloads(), 2);
        assert!(second.entries().all(|e| e.file_path.as_ref().unwrap().exists()));
    }
}
