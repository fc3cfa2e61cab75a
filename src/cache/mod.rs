//! Full-page cache with an integrated CSS/JS minification pipeline.
//!
//! - [`PageCache`]: write-once store of rendered pages keyed by [`RequestKey`]
//! - [`AssetCache`]: minified copies of site assets, tracked by manifest logs
//! - [`HtmlRewriter`]: points rendered HTML at the minified copies
//! - [`CacheController`]: the per-request lifecycle and invalidation entry points
//!
//! Everything is filesystem-backed; there is no in-memory state shared between
//! requests.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! root = "cache/pagestash"
//! minify_enabled = true
//! ```

mod assets;
mod config;
mod controller;
mod keys;
mod manifest;
mod middleware;
mod minify;
mod page;
mod privilege;
pub mod resolver;
mod rewrite;

pub use assets::{AssetCache, AssetCacheConfig, AssetCacheError, AssetOutcome, AssetUrl};
pub use config::CacheConfig;
pub use controller::{
    Begin, CacheController, Finished, InvalidationError, Phase, RequestClass, RequestContext,
    SkipReason,
};
pub use keys::{AssetKind, RequestKey, hash_str};
pub use manifest::ManifestLog;
pub use middleware::{CACHE_STATUS_HEADER, CacheState, page_cache_layer};
pub use minify::{CommandMinifier, Minifier, MinifyError, StandardMinifier, minify_css};
pub use page::{PageCache, PageCacheEntry, PageCacheError, StoreOutcome};
pub use privilege::PrivilegeRules;
pub use resolver::ResolvedAsset;
pub use rewrite::{AssetReference, HtmlRewriter, RewriteError, RewriteReport, extract_references};
