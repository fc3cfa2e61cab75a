//! Serving of minified files written by the asset cache.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{application::error::ErrorReport, cache::CacheState};

const SOURCE: &str = "infra::assets::serve_minified";

/// Answer `GET`/`HEAD` requests for minified files straight from the cache root.
///
/// Only `<dir>/<digest>.css|.js` paths are eligible; everything else, including
/// stored pages and manifest logs, falls through to the next service.
pub async fn serve_minified(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let Some(stored) = cache.controller.assets().locate(request.uri().path()) else {
        return next.run(request).await;
    };

    let head_only = method == Method::HEAD;
    let if_none_match = request.headers().get(header::IF_NONE_MATCH).cloned();
    match tokio::fs::read(&stored).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&stored).first_or_octet_stream();
            build_response(Bytes::from(contents), mime, head_only, if_none_match.as_ref())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => next.run(request).await,
        Err(err) => {
            warn!(
                target = "pagestash::infra::assets",
                op = "assets::serve",
                result = "error",
                path = %stored.display(),
                error = %err,
                "Failed to read minified asset"
            );
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

/// Stored file names hash the source path, so the same URL serves new bytes
/// after a clear. Clients must revalidate against the content tag.
fn build_response(
    bytes: Bytes,
    mime: Mime,
    head_only: bool,
    if_none_match: Option<&HeaderValue>,
) -> Response {
    let etag = content_tag(&bytes);
    let not_modified = if_none_match
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|tag| {
            let tag = tag.trim();
            tag == "*" || tag.trim_start_matches("W/") == etag
        }));

    let len = bytes.len();
    let body = if head_only || not_modified {
        Body::empty()
    } else {
        Body::from(bytes)
    };
    let mut response = Response::new(body);
    *response.status_mut() = if not_modified {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if !not_modified && let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    response
}

fn content_tag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css() -> Mime {
        mime_guess::from_ext("css").first_or_octet_stream()
    }

    #[test]
    fn minified_responses_must_revalidate() {
        let response = build_response(Bytes::from_static(b"a{b:c}"), css(), false, None);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css"
        );
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "6");
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
        assert!(response.headers().contains_key(header::ETAG));
    }

    #[test]
    fn changed_contents_change_the_tag() {
        let before = build_response(Bytes::from_static(b"a{b:c}"), css(), false, None);
        let after = build_response(Bytes::from_static(b"a{b:d}"), css(), false, None);
        assert_ne!(
            before.headers().get(header::ETAG),
            after.headers().get(header::ETAG)
        );
    }

    #[test]
    fn matching_tag_is_not_modified() {
        let first = build_response(Bytes::from_static(b"a{b:c}"), css(), false, None);
        let etag = first.headers().get(header::ETAG).unwrap().clone();

        let again = build_response(Bytes::from_static(b"a{b:c}"), css(), false, Some(&etag));
        assert_eq!(again.status(), StatusCode::NOT_MODIFIED);
        assert!(!again.headers().contains_key(header::CONTENT_LENGTH));

        let stale = HeaderValue::from_static("\"0000\"");
        let fresh = build_response(Bytes::from_static(b"a{b:c}"), css(), false, Some(&stale));
        assert_eq!(fresh.status(), StatusCode::OK);
    }
}
