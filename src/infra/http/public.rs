use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
};

use crate::{
    application::error::HttpError,
    cache::{CacheState, page_cache_layer},
    infra::{assets::serve_minified, upstream::UpstreamClient},
};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::public::proxy";

#[derive(Clone)]
pub struct HttpState {
    pub cache: CacheState,
    pub upstream: UpstreamClient,
}

/// Public router: every request that is not a minified asset goes to the origin.
pub fn build_router(state: HttpState) -> Router {
    let origin = Router::new()
        .fallback(proxy)
        .with_state(state.upstream.clone());

    layer_router(origin, state.cache)
}

/// Put the page cache, minified asset serving and request logging in front of `app`.
pub fn layer_router(app: Router, cache: CacheState) -> Router {
    app.layer(middleware::from_fn_with_state(
        cache.clone(),
        page_cache_layer,
    ))
    .layer(middleware::from_fn_with_state(cache, serve_minified))
    .layer(middleware::from_fn(log_responses))
    .layer(middleware::from_fn(set_request_context))
}

async fn proxy(State(upstream): State<UpstreamClient>, request: Request<Body>) -> Response {
    match upstream.forward(request).await {
        Ok(response) => response,
        Err(err) => {
            let status = if err.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            HttpError::from_error(SOURCE, status, "Upstream unavailable", &err).into_response()
        }
    }
}
