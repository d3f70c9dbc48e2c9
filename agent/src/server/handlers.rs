//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use control_api::{HealthResponse, PullResponse, UpdateMethod, VersionResponse};

use crate::auth::provided_secret;
use crate::server::state::ServerState;
use crate::update::executor::SELF_SLUG;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleetsync".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn authorized(state: &ServerState, headers: &HeaderMap, query: Option<&str>, body: &[u8]) -> bool {
    provided_secret(headers, query, body)
        .map(|provided| state.instance.deploy_secret.matches(&provided))
        .unwrap_or(false)
}

/// Trigger a self-update of this instance's tree.
///
/// The update runs on its own task so a caller that hangs up cannot cut a
/// reset or an archive swap short.
pub async fn pull_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    if !authorized(&state, &headers, query.as_deref(), &body) {
        warn!("Rejected pull request with a missing or invalid secret");
        return StatusCode::FORBIDDEN.into_response();
    }

    if let Some(refusal) = state.instance.refuse_self_update(SELF_SLUG) {
        warn!("Pull requested on the workbench, refusing");
        return (StatusCode::CONFLICT, Json(PullResponse::failed(refusal.message))).into_response();
    }

    info!("Pull requested");
    let updater = state.updater.clone();
    let tree = state.instance.working_tree.clone();
    let outcome = match tokio::spawn(async move { updater.update(SELF_SLUG, &tree).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Update task failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PullResponse::failed(format!("update task failed: {}", e))),
            )
                .into_response();
        }
    };

    if !outcome.success {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PullResponse::failed(outcome.message)),
        )
            .into_response();
    }

    let updated = outcome.updated();
    let method = outcome.method.wire().unwrap_or(UpdateMethod::Vcs);
    let response = PullResponse::succeeded(
        method,
        outcome.before_version,
        outcome.after_version.unwrap_or_default(),
        updated,
    );
    (StatusCode::OK, Json(response)).into_response()
}

/// Report this instance's current version
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if !authorized(&state, &headers, query.as_deref(), &[]) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let tree = state.updater.inspect(&state.instance.working_tree).await;
    Json(tree.into_status(&state.instance.site_url, state.instance.auto_update)).into_response()
}
