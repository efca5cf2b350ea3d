use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CacheError, Result};

/// Separator between the Drive file id and the original name in cache file names.
pub const FILENAME_SEPARATOR: &str = "-_-_-_-_-_";

/// Suffix for files still being written by a download.
const PARTIAL_SUFFIX: &str = ".part";

/// A file already present in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// File name without extension, `<id><separator><original name>`.
    pub base_name: String,
    /// The original name part, without extension.
    pub original_name: String,
    /// Extension including the leading dot, or empty.
    pub extension: String,
}

impl CachedFile {
    /// Parse a cache directory file name. Names without the separator, and
    /// hidden names (which includes in-progress downloads), yield `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        if file_name.starts_with('.') {
            return None;
        }

        let (base_name, extension) = match file_name.rfind('.') {
            Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
            _ => (file_name, ""),
        };
        let (id, original_name) = base_name.split_once(FILENAME_SEPARATOR)?;
        if id.is_empty() {
            return None;
        }

        Some(Self {
            base_name: base_name.to_string(),
            original_name: original_name.to_string(),
            extension: extension.to_string(),
        })
    }

    pub fn file_id(&self) -> &str {
        self.base_name
            .split_once(FILENAME_SEPARATOR)
            .map(|(id, _)| id)
            .unwrap_or(&self.base_name)
    }

    /// Full on-disk file name.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.base_name, self.extension)
    }
}

/// Build the on-disk name for a freshly downloaded file.
pub fn cache_file_name(file_id: &str, original_name: &str) -> String {
    format!("{}{}{}", file_id, FILENAME_SEPARATOR, original_name)
}

/// Temporary name a download is written under before being renamed to
/// `file_name`. Hidden, so it can never parse as a cached file whatever the
/// original name ends with.
pub(crate) fn partial_file_name(file_name: &str) -> String {
    format!(".{}{}", file_name, PARTIAL_SUFFIX)
}

/// Split an on-disk cache name back into its original name part.
pub fn original_name_of(cache_file_name: &str) -> &str {
    cache_file_name
        .split_once(FILENAME_SEPARATOR)
        .map(|(_, name)| name)
        .unwrap_or(cache_file_name)
}

/// In-memory listing of the cache directory.
///
/// Built once by scanning the directory; afterwards it only grows as downloads
/// complete, or is emptied by `clear`. Lookups are a linear scan.
#[derive(Debug)]
pub struct CacheIndex {
    dir: PathBuf,
    files: Vec<CachedFile>,
}

impl CacheIndex {
    /// Scan `dir` for cached files. A missing directory is an empty cache.
    pub fn scan(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut files = Vec::new();

        if dir.exists() {
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| walk_error(&dir, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                match CachedFile::parse(&name) {
                    Some(file) => files.push(file),
                    None => debug!(file = %name, "Ignoring non-cache file"),
                }
            }
        }

        info!(dir = %dir.display(), count = files.len(), "Indexed cache directory");
        Ok(Self { dir, files })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Find the cached file name for a remote file id, if any.
    pub fn lookup(&self, file_id: &str) -> Option<String> {
        self.files
            .iter()
            .find(|file| file.file_id() == file_id)
            .map(CachedFile::file_name)
    }

    /// Record a file that has just been written to the cache directory.
    pub fn record(&mut self, file_name: &str) {
        if let Some(file) = CachedFile::parse(file_name) {
            self.files.push(file);
        }
    }

    /// Drop every indexed file for `file_id`.
    pub fn forget(&mut self, file_id: &str) {
        self.files.retain(|file| file.file_id() != file_id);
    }

    /// Drop indexed files that are no longer on disk.
    pub fn retain_existing(&mut self) {
        let dir = &self.dir;
        self.files.retain(|file| dir.join(file.file_name()).is_file());
    }

    /// Delete every file under the cache directory and forget them.
    ///
    /// Directories are kept. The first removal error aborts the walk; files
    /// removed before it stay removed and are dropped from the index, so the
    /// index only ever lists files still on disk.
    pub fn clear(&mut self) -> Result<()> {
        self.clear_with(|path| std::fs::remove_file(path))
    }

    fn clear_with(&mut self, remove: impl FnMut(&Path) -> std::io::Result<()>) -> Result<()> {
        if let Err(e) = self.remove_all(remove) {
            self.retain_existing();
            warn!(dir = %self.dir.display(), remaining = self.files.len(), "Cache only partially cleared");
            return Err(e);
        }

        self.files.clear();
        info!(dir = %self.dir.display(), "Cache cleared");
        Ok(())
    }

    fn remove_all(&self, mut remove: impl FnMut(&Path) -> std::io::Result<()>) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(&self.dir).min_depth(1) {
            let entry = entry.map_err(|e| walk_error(&self.dir, e))?;
            if entry.file_type().is_dir() {
                continue;
            }
            remove(entry.path()).map_err(|e| CacheError::io(entry.path(), e))?;
            debug!(path = %entry.path().display(), "Deleted cached file");
        }
        Ok(())
    }
}

fn walk_error(dir: &Path, err: walkdir::Error) -> CacheError {
    let path = err.path().unwrap_or(dir).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    CacheError::io(path, source)
}
