//! Forwarding of cache misses to the origin application.

use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, HeaderName, Request, Response, header},
};
use reqwest::{Client, Url, redirect::Policy};
use thiserror::Error;
use tracing::debug;

use crate::config::UpstreamSettings;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid upstream target `{target}`: {source}")]
    Target {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error("upstream request timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// HTTP client bound to one origin.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base: Url,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent(concat!("pagestash/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            base: settings.url.clone(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve a request target (`/path?query`) against the origin.
    pub fn target_url(&self, path_and_query: &str) -> Result<Url, UpstreamError> {
        let base_path = self.base.path().trim_end_matches('/');
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.base.clone();
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(query);
        if url.cannot_be_a_base() {
            return Err(UpstreamError::Target {
                target: path_and_query.to_string(),
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            });
        }
        Ok(url)
    }

    /// Forward the request and stream the origin's response back.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let start = Instant::now();
        let (parts, body) = request.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target_url(target)?;

        let mut headers = forwarded_headers(&parts.headers);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
        }

        let mut outgoing = self.client.request(parts.method.clone(), url).headers(headers);
        // An empty body must not turn a GET into a chunked request.
        if body.size_hint().exact() != Some(0) {
            outgoing = outgoing.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outgoing
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    UpstreamError::Timeout(err)
                } else {
                    UpstreamError::Request(err)
                }
            })?;

        let status = upstream.status();
        debug!(
            target = "pagestash::infra::upstream",
            op = "upstream::forward",
            result = "ok",
            method = %parts.method,
            path = %parts.uri.path(),
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Forwarded request to origin"
        );

        let response_headers = forwarded_headers(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Copy end-to-end headers only.
///
/// `Accept-Encoding` is dropped so the origin answers with an identity body
/// that can be rewritten.
fn forwarded_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if HOP_BY_HOP.contains(name) || name == header::ACCEPT_ENCODING {
            continue;
        }
        if name.as_str() == "keep-alive" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;

    use super::*;

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(&UpstreamSettings {
            url: Url::parse(base).unwrap(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn target_keeps_path_and_query() {
        let upstream = client("http://origin.example:8080");
        let url = upstream.target_url("/posts/a?page=2").unwrap();
        assert_eq!(url.as_str(), "http://origin.example:8080/posts/a?page=2");
    }

    #[test]
    fn target_is_nested_under_base_path() {
        let upstream = client("http://origin.example/blog/");
        let url = upstream.target_url("/posts/a").unwrap();
        assert_eq!(url.as_str(), "http://origin.example/blog/posts/a");
    }

    #[test]
    fn hop_by_hop_and_encoding_headers_are_dropped() {
        let mut source = HeaderMap::new();
        source.insert(header::CONNECTION, HeaderValue::from_static("close"));
        source.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        source.insert(header::HOST, HeaderValue::from_static("site.example"));
        source.insert(header::COOKIE, HeaderValue::from_static("a=b"));
        source.insert(
            HeaderName::from_static("keep-alive"),
            HeaderValue::from_static("timeout=5"),
        );

        let headers = forwarded_headers(&source);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(header::COOKIE).unwrap(), "a=b");
    }
}
