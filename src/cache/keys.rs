//! Cache key definitions.
//!
//! Page entries are keyed by a digest of the request target; minified assets by a
//! digest of their normalized source path.

use std::fmt;

use sha2::{Digest, Sha256};

/// Digest of a request's path and query, used only as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derive the key for a request path and optional query string.
    ///
    /// An empty query is treated the same as an absent one.
    pub fn from_parts(path: &str, query: Option<&str>) -> Self {
        match query.filter(|query| !query.is_empty()) {
            Some(query) => Self::from_target(&format!("{path}?{query}")),
            None => Self::from_target(path),
        }
    }

    /// Derive the key for a raw request target (`/path?query`).
    pub fn from_target(target: &str) -> Self {
        Self(hash_str(target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of static asset handled by the asset cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Css,
    Js,
}

impl AssetKind {
    pub const ALL: [AssetKind; 2] = [AssetKind::Css, AssetKind::Js];

    /// File extension, also used as the manifest log basename.
    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::Css => "css",
            AssetKind::Js => "js",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Lowercase hex SHA-256 of a string.
pub fn hash_str(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true when `name` looks like `<64 hex>.css` or `<64 hex>.js`.
pub(crate) fn is_digest_file_name(name: &str) -> bool {
    let Some((stem, extension)) = name.rsplit_once('.') else {
        return false;
    };
    let known_extension = AssetKind::ALL
        .iter()
        .any(|kind| kind.extension() == extension);
    known_extension
        && stem.len() == 64
        && stem
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}
