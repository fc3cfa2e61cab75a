//! Content-addressed store of minified CSS/JS files.
//!
//! Files are named after a digest of their normalized source *path*, not their
//! content, and placed under a mirror of the source directory:
//! `style/site.css` becomes `<cache root>/style/<sha256("style/site.css")>.css`.
//! Editing a source file therefore does not invalidate its minified copy; that
//! takes an explicit [`AssetCache::clear`].

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use metrics::counter;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    keys::{AssetKind, hash_str, is_digest_file_name},
    manifest::ManifestLog,
    minify::{MinifyError, Minifier},
    resolver::{ResolvedAsset, is_contained_path},
};

#[derive(Debug, Error)]
pub enum AssetCacheError {
    #[error("asset path `{0}` does not resolve inside the site root")]
    InvalidPath(String),
    #[error("failed to read asset source `{path}`: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Minify(#[from] MinifyError),
    #[error("failed to store minified asset `{path}`: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to clear {kind} assets: {source}")]
    Clear {
        kind: AssetKind,
        #[source]
        source: io::Error,
    },
}

/// How a public URL was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    /// The minified file already existed.
    Reused,
    /// The source was minified and stored during this call.
    Minified,
    /// Minification failed; the original reference is kept.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUrl {
    pub url: String,
    pub outcome: AssetOutcome,
}

/// Filesystem locations and URL prefix used by [`AssetCache`].
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    /// Cache root; minified files and manifest logs live here.
    pub root: PathBuf,
    /// Directory that normalized source paths are relative to.
    pub site_root: PathBuf,
    /// Public URL prefix at which `root` is served, ending with `/`.
    pub public_base: String,
}

#[derive(Clone)]
pub struct AssetCache {
    root: PathBuf,
    site_root: PathBuf,
    public_base: String,
    minifier: Arc<dyn Minifier>,
    css_log: ManifestLog,
    js_log: ManifestLog,
}

impl AssetCache {
    pub fn new(config: AssetCacheConfig, minifier: Arc<dyn Minifier>) -> Self {
        let root = std::path::absolute(&config.root).unwrap_or(config.root);
        let css_log = ManifestLog::new(&root, AssetKind::Css);
        let js_log = ManifestLog::new(&root, AssetKind::Js);
        Self {
            root,
            site_root: config.site_root,
            public_base: config.public_base,
            minifier,
            css_log,
            js_log,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self, kind: AssetKind) -> &ManifestLog {
        match kind {
            AssetKind::Css => &self.css_log,
            AssetKind::Js => &self.js_log,
        }
    }

    /// Cache-root-relative location of the minified copy of `normalized_path`.
    pub fn stored_relative_path(normalized_path: &str, kind: AssetKind) -> String {
        let file_name = format!("{}.{}", hash_str(normalized_path), kind.extension());
        match normalized_path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => format!("{dir}/{file_name}"),
            _ => file_name,
        }
    }

    /// Public URL for the minified copy of `normalized_path`, creating it on first use.
    pub fn get_or_create(
        &self,
        normalized_path: &str,
        kind: AssetKind,
    ) -> Result<AssetUrl, AssetCacheError> {
        if !is_contained_path(normalized_path) {
            return Err(AssetCacheError::InvalidPath(normalized_path.to_string()));
        }

        let relative = Self::stored_relative_path(normalized_path, kind);
        let stored = self.root.join(&relative);
        let url = format!("{}{relative}", self.public_base);

        if stored.is_file() {
            counter!("pagestash_asset_reused_total", "kind" => kind.extension()).increment(1);
            debug!(
                target = "pagestash::cache::assets",
                op = "assets::get_or_create",
                result = "hit",
                source_path = normalized_path,
                stored = %stored.display(),
                "Minified asset already cached"
            );
            return Ok(AssetUrl {
                url,
                outcome: AssetOutcome::Reused,
            });
        }

        let started_at = Instant::now();
        let source_path = self.site_root.join(normalized_path);
        let source = fs::read(&source_path).map_err(|source| AssetCacheError::Source {
            path: source_path.clone(),
            source,
        })?;
        let minified = self.minifier.minify(kind, &source)?;

        let created = self.write_stored(&stored, &minified)?;
        if created {
            self.manifest(kind)
                .append(&stored)
                .map_err(|source| AssetCacheError::Store {
                    path: self.manifest(kind).path().to_path_buf(),
                    source,
                })?;
        }

        counter!("pagestash_asset_minified_total", "kind" => kind.extension()).increment(1);
        info!(
            target = "pagestash::cache::assets",
            op = "assets::get_or_create",
            result = "minified",
            source_path = normalized_path,
            stored = %stored.display(),
            source_bytes = source.len(),
            minified_bytes = minified.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Minified asset stored"
        );

        Ok(AssetUrl {
            url,
            outcome: AssetOutcome::Minified,
        })
    }

    /// Like [`get_or_create`](Self::get_or_create), but degrades to the original
    /// reference when the minified copy cannot be produced.
    pub fn url_for(&self, asset: &ResolvedAsset, kind: AssetKind) -> AssetUrl {
        match self.get_or_create(&asset.normalized_path, kind) {
            Ok(url) => url,
            Err(err) => {
                counter!("pagestash_asset_fallback_total", "kind" => kind.extension())
                    .increment(1);
                warn!(
                    target = "pagestash::cache::assets",
                    op = "assets::url_for",
                    result = "fallback",
                    original_url = %asset.original_url,
                    source_path = %asset.normalized_path,
                    error = %err,
                    "Minification failed; keeping original asset reference"
                );
                AssetUrl {
                    url: asset.original_url.clone(),
                    outcome: AssetOutcome::Fallback,
                }
            }
        }
    }

    /// Delete every minified file of `kind` listed in its manifest, then the manifest.
    pub fn clear(&self, kind: AssetKind) -> Result<usize, AssetCacheError> {
        let removed = self
            .manifest(kind)
            .clear()
            .map_err(|source| AssetCacheError::Clear { kind, source })?;
        info!(
            target = "pagestash::cache::assets",
            op = "assets::clear",
            result = "ok",
            kind = kind.extension(),
            removed,
            "Cleared minified assets"
        );
        Ok(removed)
    }

    /// Map a request path (`/dir/<digest>.css`) to a stored minified file, if any.
    pub fn locate(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        let file_name = relative.rsplit('/').next()?;
        if !is_digest_file_name(file_name) || !is_contained_path(relative) {
            return None;
        }
        let stored = self.root.join(relative);
        stored.is_file().then_some(stored)
    }

    /// Returns false when another writer persisted the same file first.
    fn write_stored(&self, stored: &Path, contents: &[u8]) -> Result<bool, AssetCacheError> {
        let store_error = |source: io::Error| AssetCacheError::Store {
            path: stored.to_path_buf(),
            source,
        };
        let dir = stored.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(store_error)?;

        let mut staged = NamedTempFile::new_in(dir).map_err(store_error)?;
        staged.write_all(contents).map_err(store_error)?;
        staged.flush().map_err(store_error)?;

        match staged.persist_noclobber(stored) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(store_error(err.error)),
        }
    }
}
