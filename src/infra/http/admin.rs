//! Admin listener: cache invalidation actions and a status screen.

use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    application::error::{AppError, HttpError},
    cache::{AssetKind, CacheController, InvalidationError},
};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::admin";
const CLEAR_CONTENTS: &str = "clear_contents_caches";
const CLEAR_ALL: &str = "clear_all_caches";

#[derive(Clone)]
pub struct AdminState {
    pub controller: Arc<CacheController>,
    /// Path of the status screen that actions redirect back to.
    pub settings_path: String,
}

pub fn build_admin_router(state: AdminState) -> Router {
    let settings_path = state.settings_path.clone();
    Router::new()
        .route("/actions/clear_contents_caches", post(clear_contents_caches))
        .route("/actions/clear_all_caches", post(clear_all_caches))
        .route("/hooks/content-updated", post(content_updated))
        .route(&settings_path, get(settings_status))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn clear_contents_caches(State(state): State<AdminState>) -> Response {
    match run_invalidation(&state, CLEAR_CONTENTS, CacheController::clear_content_caches).await {
        Ok(()) => redirect_with_notice(&state.settings_path, CLEAR_CONTENTS),
        Err(err) => err.into_response(),
    }
}

async fn clear_all_caches(State(state): State<AdminState>) -> Response {
    match run_invalidation(&state, CLEAR_ALL, CacheController::clear_all_caches).await {
        Ok(()) => redirect_with_notice(&state.settings_path, CLEAR_ALL),
        Err(err) => err.into_response(),
    }
}

async fn content_updated(State(state): State<AdminState>) -> Response {
    match run_invalidation(&state, "content_updated", CacheController::on_content_updated).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn run_invalidation(
    state: &AdminState,
    action: &'static str,
    operation: fn(&CacheController) -> Result<(), InvalidationError>,
) -> Result<(), AppError> {
    let start = Instant::now();
    let controller = Arc::clone(&state.controller);
    tokio::task::spawn_blocking(move || operation(&controller))
        .await
        .map_err(|err| AppError::unexpected(format!("invalidation task failed: {err}")))??;

    info!(
        target = "pagestash::http::admin",
        op = "admin::invalidate",
        result = "ok",
        action,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Admin cache action completed"
    );
    Ok(())
}

fn redirect_with_notice(settings_path: &str, notice: &str) -> Response {
    Redirect::to(&format!("{settings_path}?settings-updated={notice}")).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsQuery {
    #[serde(rename = "settings-updated")]
    settings_updated: Option<String>,
}

/// JSON status screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsStatus {
    pub minify_enabled: bool,
    pub pages: usize,
    pub css_manifest_entries: usize,
    pub js_manifest_entries: usize,
    pub notice: Option<String>,
}

async fn settings_status(
    State(state): State<AdminState>,
    Query(query): Query<SettingsQuery>,
) -> Response {
    let controller = Arc::clone(&state.controller);
    let counts = tokio::task::spawn_blocking(move || -> std::io::Result<(usize, usize, usize)> {
        let pages = controller.pages().len();
        let css = controller.assets().manifest(AssetKind::Css).entries()?.len();
        let js = controller.assets().manifest(AssetKind::Js).entries()?.len();
        Ok((pages, css, js))
    })
    .await;

    let (pages, css, js) = match counts {
        Ok(Ok(counts)) => counts,
        Ok(Err(err)) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read cache status",
                &err,
            )
            .into_response();
        }
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read cache status",
                &err,
            )
            .into_response();
        }
    };

    let status = SettingsStatus {
        minify_enabled: state.controller.minify_enabled(),
        pages,
        css_manifest_entries: css,
        js_manifest_entries: js,
        notice: query
            .settings_updated
            .as_deref()
            .and_then(notice_for)
            .map(str::to_string),
    };
    Json(status).into_response()
}

fn notice_for(value: &str) -> Option<&'static str> {
    match value {
        CLEAR_CONTENTS => Some("Contents Caches have been Deleted"),
        CLEAR_ALL => Some("All Caches have been Deleted"),
        "true" => Some("Settings Saved"),
        _ => None,
    }
}
