//! Cache configuration.
//!
//! Resolved from the `[cache]`, `[site]`, `[minify]` and `[privilege]` sections of
//! `pagestash.toml`.

use std::{path::PathBuf, sync::Arc};

use super::{
    assets::{AssetCache, AssetCacheConfig},
    controller::CacheController,
    minify::{CommandMinifier, Minifier, StandardMinifier},
    page::PageCache,
    privilege::PrivilegeRules,
    rewrite::HtmlRewriter,
};

const DEFAULT_CACHE_ROOT: &str = "cache/pagestash";
const DEFAULT_SITE_ROOT: &str = "public";
const DEFAULT_SITE_BASE_URL: &str = "http://127.0.0.1:3000/";
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and store pages at all.
    pub enabled: bool,
    /// Rewrite CSS/JS references to minified copies.
    pub minify_enabled: bool,
    pub root: PathBuf,
    /// Filesystem root that asset paths are resolved against.
    pub site_root: PathBuf,
    /// Public base URL of the site, ending with `/`.
    pub site_base_url: String,
    /// Public URL prefix for minified files, ending with `/`.
    pub asset_base_url: String,
    /// Largest response body that will be buffered for rewriting and storage.
    pub max_body_bytes: usize,
    pub css_command: Option<CommandMinifier>,
    pub js_command: Option<CommandMinifier>,
    pub privilege: PrivilegeRules,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minify_enabled: false,
            root: PathBuf::from(DEFAULT_CACHE_ROOT),
            site_root: PathBuf::from(DEFAULT_SITE_ROOT),
            site_base_url: DEFAULT_SITE_BASE_URL.to_string(),
            asset_base_url: DEFAULT_SITE_BASE_URL.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            css_command: None,
            js_command: None,
            privilege: PrivilegeRules::default(),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            enabled: settings.cache.enabled,
            minify_enabled: settings.cache.minify_enabled,
            root: settings.cache.root.clone(),
            site_root: settings.site.root.clone(),
            site_base_url: settings.site.base_url.clone(),
            asset_base_url: settings.cache.asset_base_url.clone(),
            max_body_bytes: settings.cache.max_body_bytes,
            css_command: settings.minify.css_command.clone(),
            js_command: settings.minify.js_command.clone(),
            privilege: PrivilegeRules {
                admin_path_prefixes: settings.privilege.admin_path_prefixes.clone(),
                session_cookie_prefixes: settings.privilege.session_cookie_prefixes.clone(),
            },
        }
    }
}

impl CacheConfig {
    /// The default minifier for this configuration.
    pub fn minifier(&self) -> Arc<dyn Minifier> {
        Arc::new(StandardMinifier::new(
            self.css_command.clone(),
            self.js_command.clone(),
        ))
    }

    pub fn build_controller(&self) -> CacheController {
        self.build_controller_with(self.minifier())
    }

    pub fn build_controller_with(&self, minifier: Arc<dyn Minifier>) -> CacheController {
        let assets = AssetCache::new(
            AssetCacheConfig {
                root: self.root.clone(),
                site_root: self.site_root.clone(),
                public_base: self.asset_base_url.clone(),
            },
            minifier,
        );
        CacheController::new(
            PageCache::new(&self.root),
            HtmlRewriter::new(assets, self.site_base_url.clone()),
            self.minify_enabled,
        )
    }
}
