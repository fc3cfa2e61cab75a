//! Append-only manifest of produced asset files, one log per asset kind.

use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use fd_lock::RwLock;
use tracing::warn;

use super::keys::{AssetKind, is_digest_file_name};

/// Newline-delimited list of stored asset paths, used to drive bulk deletion.
///
/// The log is never compacted; it may name files that are already gone and may
/// name the same file more than once.
#[derive(Debug, Clone)]
pub struct ManifestLog {
    path: PathBuf,
    root: PathBuf,
}

impl ManifestLog {
    /// The manifest for `kind` under `root` (`<root>/css.log`, `<root>/js.log`).
    pub fn new(root: &Path, kind: AssetKind) -> Self {
        Self {
            path: root.join(format!("{}.log", kind.extension())),
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one stored path as a single write under an exclusive advisory lock.
    pub fn append(&self, stored: &Path) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut lock = RwLock::new(file);
        let mut guard = lock.write()?;
        let line = format!("{}\n", stored.display());
        guard.write_all(line.as_bytes())?;
        guard.flush()
    }

    /// Every non-empty line, in append order. A missing log has no entries.
    pub fn entries(&self) -> io::Result<Vec<PathBuf>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Delete every listed file that still exists, then the log itself.
    ///
    /// Returns the number of files removed. Lines pointing outside the cache root,
    /// or at anything other than a produced asset, are skipped.
    pub fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        for stored in self.entries()? {
            if !self.owns(&stored) {
                warn!(
                    target = "pagestash::cache::manifest",
                    op = "manifest::clear",
                    result = "skipped",
                    manifest = %self.path.display(),
                    entry = %stored.display(),
                    "Ignoring manifest entry outside the cache root"
                );
                continue;
            }
            match fs::remove_file(&stored) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(removed),
            Err(err) => Err(err),
        }
    }

    fn owns(&self, stored: &Path) -> bool {
        stored.starts_with(&self.root)
            && stored
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_digest_file_name)
    }
}
