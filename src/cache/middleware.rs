//! Page cache middleware.
//!
//! Serves stored pages for public `GET`/`HEAD` requests and, on a miss, buffers
//! the downstream HTML response, rewrites its asset references and stores it.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::application::error::ErrorReport;

use super::{
    CacheConfig,
    controller::{Begin, CacheController, RequestContext},
    keys::RequestKey,
    privilege::PrivilegeRules,
};

const SOURCE: &str = "cache::middleware";
pub const CACHE_STATUS_HEADER: &str = "x-pagestash";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub controller: Arc<CacheController>,
}

impl CacheState {
    pub fn new(config: CacheConfig, controller: CacheController) -> Self {
        Self {
            config: Arc::new(config),
            controller: Arc::new(controller),
        }
    }

    fn privilege(&self) -> &PrivilegeRules {
        &self.config.privilege
    }
}

/// Middleware for the full-page cache.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let class = cache
        .privilege()
        .classify(request.uri().path(), request.headers());
    let key = RequestKey::from_parts(request.uri().path(), request.uri().query());

    let controller = Arc::clone(&cache.controller);
    let begin = tokio::task::spawn_blocking(move || controller.begin(key, class)).await;
    let context = match begin {
        Ok(Begin::Served(body)) => return cached_response(body, method == Method::HEAD),
        Ok(Begin::Render(context)) => context,
        Err(err) => {
            warn!(
                target = "pagestash::cache::middleware",
                op = "middleware::begin",
                result = "join_error",
                error = %err,
                "Cache lookup task failed; rendering uncached"
            );
            return next.run(request).await;
        }
    };

    let response = next.run(request).await;

    // A HEAD render has no body worth storing.
    if method == Method::HEAD || !is_cacheable(&response, cache.config.max_body_bytes) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let rendered = match buffer_body(body, cache.config.max_body_bytes).await {
        Ok(Buffered::Complete(bytes)) => bytes,
        Ok(Buffered::Oversized(body)) => {
            debug!(
                target = "pagestash::cache::middleware",
                op = "middleware::buffer",
                result = "oversized",
                limit = cache.config.max_body_bytes,
                "Rendered body exceeds the buffer limit; serving uncached"
            );
            return Response::from_parts(parts, body);
        }
        Err(err) => {
            let mut response = StatusCode::BAD_GATEWAY.into_response();
            ErrorReport::from_message(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                format!("failed to buffer rendered body: {err}"),
            )
            .attach(&mut response);
            return response;
        }
    };

    let body = finish(Arc::clone(&cache.controller), context, rendered).await;

    parts.headers.remove(CONTENT_LENGTH);
    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("miss"));
    Response::from_parts(parts, Body::from(body))
}

enum Buffered {
    Complete(Bytes),
    /// The limit was crossed; the body replays what was read and streams the rest.
    Oversized(Body),
}

/// Collect a body up to `limit` bytes. Only stream errors are errors.
async fn buffer_body(body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    if body.size_hint().lower() > limit as u64 {
        return Ok(Buffered::Oversized(body));
    }

    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        total += chunk.len();
        chunks.push(chunk);
        if total > limit {
            let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Oversized(Body::from_stream(prefix.chain(data))));
        }
    }

    let mut buffer = BytesMut::with_capacity(total);
    for chunk in chunks {
        buffer.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(buffer.freeze()))
}

async fn finish(controller: Arc<CacheController>, mut context: RequestContext, rendered: Bytes) -> Bytes {
    context.write(&rendered);
    match tokio::task::spawn_blocking(move || controller.finish(context)).await {
        Ok(finished) => finished.body,
        Err(err) => {
            warn!(
                target = "pagestash::cache::middleware",
                op = "middleware::finish",
                result = "join_error",
                error = %err,
                "Rewrite task failed; serving rendered body unchanged"
            );
            rendered
        }
    }
}

/// Only successful, uncompressed HTML without cookies is buffered.
fn is_cacheable(response: &Response, max_body_bytes: usize) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(SET_COOKIE) {
        return false;
    }

    let is_html = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("text/html"));
    if !is_html {
        return false;
    }

    let encoded = headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.eq_ignore_ascii_case("identity"));
    if encoded {
        return false;
    }

    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    !declared_len.is_some_and(|len| len > max_body_bytes)
}

/// Build a response from a stored page.
fn cached_response(body: Bytes, head_only: bool) -> Response {
    let len = body.len();
    let body = if head_only { Body::empty() } else { Body::from(body) };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CONTENT_LENGTH, len)
        .header(CACHE_CONTROL, "no-cache")
        .header(CACHE_STATUS_HEADER, "hit")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
