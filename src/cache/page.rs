//! Rendered page storage.
//!
//! Each entry lives at `<cache root>/html/<request key>.html` and is written at most
//! once: the body goes to a temporary file first and is renamed into place without
//! clobbering, so a concurrent writer for the same key loses cleanly.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use super::keys::RequestKey;

const PAGE_DIR: &str = "html";
const PAGE_EXTENSION: &str = "html";

#[derive(Debug, Error)]
pub enum PageCacheError {
    #[error("failed to prepare page cache directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write page cache entry: {0}")]
    Write(#[source] io::Error),
    #[error("failed to clear page cache directory `{path}`: {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a successful [`PageCache::store`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    AlreadyExists,
}

/// A stored page, as read back from disk.
#[derive(Debug, Clone)]
pub struct PageCacheEntry {
    pub key: RequestKey,
    pub body: Bytes,
    pub created_at: OffsetDateTime,
}

/// Filesystem-backed, write-once page cache.
#[derive(Debug, Clone)]
pub struct PageCache {
    dir: PathBuf,
}

impl PageCache {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join(PAGE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(format!("{key}.{PAGE_EXTENSION}"))
    }

    /// Read the stored body for `key`. A missing entry is `None`; unreadable entries
    /// are logged and also reported as `None`.
    pub fn lookup(&self, key: &RequestKey) -> Option<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(body) => Some(Bytes::from(body)),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    target = "pagestash::cache::page",
                    op = "page::lookup",
                    result = "read_error",
                    key = %key,
                    path = %path.display(),
                    error = %err,
                    "Failed to read cached page; treating as a miss"
                );
                None
            }
        }
    }

    /// Like [`lookup`](Self::lookup) but includes the entry's creation time.
    pub fn entry(&self, key: &RequestKey) -> Option<PageCacheEntry> {
        let body = self.lookup(key)?;
        let metadata = fs::metadata(self.path_for(key)).ok()?;
        let created = metadata.created().or_else(|_| metadata.modified()).ok()?;
        Some(PageCacheEntry {
            key: key.clone(),
            body,
            created_at: OffsetDateTime::from(created),
        })
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Store `body` under `key` unless an entry already exists.
    pub fn store(&self, key: &RequestKey, body: &[u8]) -> Result<StoreOutcome, PageCacheError> {
        let path = self.path_for(key);
        if path.exists() {
            return Ok(StoreOutcome::AlreadyExists);
        }

        fs::create_dir_all(&self.dir).map_err(|source| PageCacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut staged = NamedTempFile::new_in(&self.dir).map_err(PageCacheError::Write)?;
        staged.write_all(body).map_err(PageCacheError::Write)?;
        staged.flush().map_err(PageCacheError::Write)?;

        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(StoreOutcome::Stored),
            // Another request stored the same key first.
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                Ok(StoreOutcome::AlreadyExists)
            }
            Err(err) => Err(PageCacheError::Write(err.error)),
        }
    }

    /// Delete every stored page. A missing directory counts as already clear.
    pub fn clear_all(&self) -> Result<(), PageCacheError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PageCacheError::Clear {
                path: self.dir.clone(),
                source,
            }),
        }
    }

    /// Number of stored pages.
    pub fn len(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.path().extension().and_then(|ext| ext.to_str()) == Some(PAGE_EXTENSION)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
