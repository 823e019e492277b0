//! On-disk body cache.
//!
//! Fetched bodies are stored content-addressed under the cache root at
//! `<queue_name>/<digest>`, i.e. the cache key doubles as the relative path.
//! The file's mtime is the authoritative freshness timestamp; callers supply
//! an optional `expire` window and entries older than it read as misses.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Cache store errors.
///
/// A missing entry is not an error; reads return `Ok(None)` for those. The
/// `NotAFile` case (something else occupies the entry path) surfaces as an
/// internal error to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Entry path exists but is not a regular file
    #[error("cache entry is not a regular file: {0}")]
    NotAFile(PathBuf),

    /// Filesystem error other than not-found
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fresh cache entry opened for streaming.
pub struct CacheHit {
    /// Open handle on the cached body
    pub file: tokio::fs::File,
    /// Entry mtime, the freshness timestamp
    pub modified: SystemTime,
}

/// Filesystem cache keyed by `queue_name/<digest>`.
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`. Queue subdirectories are created by
    /// the queue registry on registration.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // The key is `queue/<base58 digest>`: the queue registry rejects
        // names with dot-only labels or path separators before a key can
        // exist, and the digest is base58.
        self.root.join(key)
    }

    /// Open a cache entry for streaming, if present and fresh.
    ///
    /// `expire` is the caller-supplied freshness window; entries whose mtime
    /// is older than `now - expire` read as misses. `None` accepts any age.
    pub async fn open_for_read(
        &self,
        key: &str,
        expire: Option<Duration>,
    ) -> Result<Option<CacheHit>, CacheError> {
        let path = self.entry_path(key);

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !meta.is_file() {
            return Err(CacheError::NotAFile(path));
        }

        let modified = meta.modified()?;
        if let Some(expire) = expire {
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age > expire {
                debug!(key = %key, age_ms = age.as_millis() as u64, "cache entry expired");
                return Ok(None);
            }
        }

        let file = tokio::fs::File::open(&path).await?;
        Ok(Some(CacheHit { file, modified }))
    }

    /// Write a body to the cache, atomically.
    ///
    /// The body lands in a sibling temp file first and is renamed into place,
    /// so concurrent readers never observe a partial entry.
    pub async fn write(&self, key: &str, body: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = tmp_path(&path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key = %key, bytes = body.len(), "cache entry written");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
