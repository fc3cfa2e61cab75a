//! Request lifecycle orchestration and invalidation.
//!
//! A request moves through
//! `AwaitingRequest -> Buffering -> Rewriting -> Stored | Skipped`, or straight
//! to `Served` on a cache hit. All per-request state lives in [`RequestContext`],
//! which the host threads through its own pipeline.

use bytes::{Bytes, BytesMut};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    assets::{AssetCache, AssetCacheError},
    keys::{AssetKind, RequestKey},
    page::{PageCache, PageCacheError, StoreOutcome},
    rewrite::HtmlRewriter,
};

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error(transparent)]
    Pages(#[from] PageCacheError),
    #[error(transparent)]
    Assets(#[from] AssetCacheError),
}

/// Who is asking. Privileged requests are never served from, or stored into, the
/// page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Public,
    /// Authenticated session.
    Session,
    /// Administrative route.
    Administrative,
}

impl RequestClass {
    pub fn is_privileged(self) -> bool {
        !matches!(self, RequestClass::Public)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingRequest,
    Buffering,
    Rewriting,
    Stored,
    Served,
    Skipped,
}

/// Why a rendered page was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Privileged,
    AlreadyCached,
    StoreFailed,
}

/// Per-request state: the key, the request class and the output buffer.
///
/// The buffer supports nested layers; [`CacheController::finish`] drains them in
/// the order they were opened.
#[derive(Debug)]
pub struct RequestContext {
    key: RequestKey,
    class: RequestClass,
    phase: Phase,
    layers: Vec<BytesMut>,
}

impl RequestContext {
    fn new(key: RequestKey, class: RequestClass) -> Self {
        Self {
            key,
            class,
            phase: Phase::Buffering,
            layers: vec![BytesMut::new()],
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn class(&self) -> RequestClass {
        self.class
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Open a new buffering layer; subsequent writes go there.
    pub fn push_layer(&mut self) {
        self.layers.push(BytesMut::new());
    }

    /// Append rendered output to the innermost layer.
    pub fn write(&mut self, chunk: &[u8]) {
        match self.layers.last_mut() {
            Some(layer) => layer.extend_from_slice(chunk),
            None => self.layers.push(BytesMut::from(chunk)),
        }
    }

    fn drain(&mut self) -> Bytes {
        let mut output = BytesMut::new();
        for layer in self.layers.drain(..) {
            output.extend_from_slice(&layer);
        }
        output.freeze()
    }
}

/// Outcome of [`CacheController::begin`].
#[derive(Debug)]
pub enum Begin {
    /// Stored bytes to send verbatim; no rendering should happen.
    Served(Bytes),
    /// Render normally, writing output into the context.
    Render(RequestContext),
}

/// Outcome of [`CacheController::finish`].
#[derive(Debug, Clone)]
pub struct Finished {
    /// The body to send, whether or not it was stored.
    pub body: Bytes,
    pub phase: Phase,
    pub skipped: Option<SkipReason>,
}

#[derive(Clone)]
pub struct CacheController {
    pages: PageCache,
    rewriter: HtmlRewriter,
    minify_enabled: bool,
}

impl CacheController {
    pub fn new(pages: PageCache, rewriter: HtmlRewriter, minify_enabled: bool) -> Self {
        Self {
            pages,
            rewriter,
            minify_enabled,
        }
    }

    pub fn pages(&self) -> &PageCache {
        &self.pages
    }

    pub fn assets(&self) -> &AssetCache {
        self.rewriter.assets()
    }

    pub fn minify_enabled(&self) -> bool {
        self.minify_enabled
    }

    /// Pre-render hook.
    pub fn begin(&self, key: RequestKey, class: RequestClass) -> Begin {
        if !class.is_privileged()
            && let Some(body) = self.pages.lookup(&key)
        {
            counter!("pagestash_page_hit_total").increment(1);
            debug!(
                target = "pagestash::cache::controller",
                op = "controller::begin",
                result = "hit",
                key = %key,
                bytes = body.len(),
                "Serving cached page"
            );
            return Begin::Served(body);
        }

        if !class.is_privileged() {
            counter!("pagestash_page_miss_total").increment(1);
        }
        debug!(
            target = "pagestash::cache::controller",
            op = "controller::begin",
            result = "render",
            key = %key,
            class = ?class,
            "Rendering page"
        );
        Begin::Render(RequestContext::new(key, class))
    }

    /// Post-render hook: rewrite the buffered output and store it when allowed.
    pub fn finish(&self, mut context: RequestContext) -> Finished {
        let rendered = context.drain();
        context.phase = Phase::Rewriting;
        let body = self.rewrite_body(rendered);

        let skipped = if context.class.is_privileged() {
            Some(SkipReason::Privileged)
        } else {
            match self.pages.store(&context.key, &body) {
                Ok(StoreOutcome::Stored) => None,
                Ok(StoreOutcome::AlreadyExists) => Some(SkipReason::AlreadyCached),
                Err(err) => {
                    warn!(
                        target = "pagestash::cache::controller",
                        op = "controller::finish",
                        result = "store_error",
                        key = %context.key,
                        error = %err,
                        "Failed to store rendered page; serving uncached"
                    );
                    Some(SkipReason::StoreFailed)
                }
            }
        };

        context.phase = match skipped {
            None => {
                counter!("pagestash_page_store_total").increment(1);
                Phase::Stored
            }
            Some(_) => {
                counter!("pagestash_page_store_skipped_total").increment(1);
                Phase::Skipped
            }
        };
        debug!(
            target = "pagestash::cache::controller",
            op = "controller::finish",
            result = ?context.phase,
            key = %context.key,
            skipped = ?skipped,
            bytes = body.len(),
            "Finished page"
        );

        Finished {
            body,
            phase: context.phase,
            skipped,
        }
    }

    fn rewrite_body(&self, rendered: Bytes) -> Bytes {
        if !self.minify_enabled {
            return rendered;
        }
        match std::str::from_utf8(&rendered) {
            Ok(html) => Bytes::from(self.rewriter.rewrite(html, true)),
            Err(_) => {
                warn!(
                    target = "pagestash::cache::controller",
                    op = "controller::rewrite",
                    result = "skipped",
                    "Rendered output is not UTF-8; skipping asset rewrite"
                );
                rendered
            }
        }
    }

    /// Drop every stored page.
    pub fn clear_content_caches(&self) -> Result<(), InvalidationError> {
        self.pages.clear_all()?;
        record_invalidation("contents");
        Ok(())
    }

    /// Drop every stored page and every minified asset.
    pub fn clear_all_caches(&self) -> Result<(), InvalidationError> {
        self.pages.clear_all()?;
        for kind in AssetKind::ALL {
            self.assets().clear(kind)?;
        }
        record_invalidation("all");
        Ok(())
    }

    /// Published content changed; only pages can be stale.
    pub fn on_content_updated(&self) -> Result<(), InvalidationError> {
        self.pages.clear_all()?;
        record_invalidation("content_updated");
        Ok(())
    }
}

fn record_invalidation(scope: &'static str) {
    counter!("pagestash_invalidation_total", "scope" => scope).increment(1);
    info!(
        target = "pagestash::cache::controller",
        op = "controller::invalidate",
        result = "ok",
        scope,
        "Cache invalidated"
    );
}
