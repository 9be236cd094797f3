//! # REST API for Remote Sync
//!
//! Manual pull from the remote and a view of the outbox backlog.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use super::{session, SessionUserHeader};
use crate::AppState;

/// Pull-merge the caller's records from the remote
pub async fn sync_now(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
) -> impl IntoResponse {
    info!("POST /api/sync - user: {}", user.user_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let outcome = state.sync_service.sync_from_remote(&ctx).await;
    let status = if outcome.is_synced() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(outcome.to_response())).into_response()
}

/// Pending and dead-lettered outbox entries
pub async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    info!("GET /api/sync/status");

    match state.sync_service.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => {
            error!("Failed to read sync status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading sync status").into_response()
        }
    }
}
