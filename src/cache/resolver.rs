//! Maps asset references found in HTML to site-relative source paths.

use std::path::{Component, Path};

use url::Url;

/// An asset reference after resolution against the site base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// The reference exactly as it appeared in the document.
    pub original_url: String,
    /// Site-relative path with query string, fragment and leading separator removed.
    pub normalized_path: String,
    /// Whether the asset is eligible for minification.
    pub is_internal: bool,
}

/// Resolve `url` against `site_base` (which ends with `/`).
pub fn resolve(url: &str, site_base: &str) -> ResolvedAsset {
    ResolvedAsset {
        original_url: url.to_string(),
        normalized_path: normalize(url, site_base),
        is_internal: is_internal(url, site_base),
    }
}

/// An asset is internal when it points at the current site, or does not carry an
/// `http`/`https` scheme at all (root-relative, path-relative, scheme-relative).
pub fn is_internal(url: &str, site_base: &str) -> bool {
    url.starts_with(site_base) || !url.starts_with("http")
}

fn normalize(url: &str, site_base: &str) -> String {
    let stripped = strip_query(url);

    if stripped.starts_with(site_base) {
        return match Url::parse(stripped) {
            Ok(parsed) => parsed.path().trim_start_matches('/').to_string(),
            Err(_) => stripped[site_base.len()..].to_string(),
        };
    }

    match stripped.strip_prefix('/') {
        Some(rest) => rest.to_string(),
        None => stripped.to_string(),
    }
}

fn strip_query(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(index) => &url[..index],
        None => url,
    }
}

/// Returns true when `path` is a non-empty relative path made only of normal
/// components, so joining it onto a root can never escape that root.
pub(crate) fn is_contained_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}
