//! # REST API for Observation Logs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use super::{domain_error, session, SessionUserHeader};
use crate::domain::log_service::group_logs_by_age;
use crate::AppState;
use shared::{RecordId, SaveLogRequest};

/// Save a log; answers with the child's logs, newest first
pub async fn save_log(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<SaveLogRequest>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/logs", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .log_service
        .save_log(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(logs) => (StatusCode::CREATED, Json(logs)).into_response(),
        Err(e) => domain_error("Failed to save log", e, StatusCode::BAD_REQUEST),
    }
}

pub async fn list_logs(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/logs", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.log_service.logs_for_child(&ctx, &RecordId::from(child_id)).await {
        Ok(logs) => (StatusCode::OK, Json(logs)).into_response(),
        Err(e) => {
            error!("Failed to list logs: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing logs").into_response()
        }
    }
}

/// Logs grouped by month of age
pub async fn log_timeline(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/logs/timeline", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.log_service.logs_for_child(&ctx, &RecordId::from(child_id)).await {
        Ok(logs) => (StatusCode::OK, Json(group_logs_by_age(logs))).into_response(),
        Err(e) => {
            error!("Failed to build log timeline: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing logs").into_response()
        }
    }
}

pub async fn delete_log(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path((child_id, log_id)): Path<(String, String)>,
) -> impl IntoResponse {
    info!("DELETE /api/children/{}/logs/{}", child_id, log_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .log_service
        .delete_log(&ctx, &RecordId::from(child_id), &RecordId::from(log_id))
        .await
    {
        Ok(logs) => (StatusCode::OK, Json(logs)).into_response(),
        Err(e) => {
            error!("Failed to delete log: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error deleting log").into_response()
        }
    }
}

/// Logs other family members wrote since the caller last marked them read
pub async fn family_log_notifications(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/notifications", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .notification_service
        .new_logs(&ctx, &RecordId::from(child_id))
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to check notifications: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error checking notifications").into_response()
        }
    }
}

pub async fn mark_notifications_read(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
) -> impl IntoResponse {
    info!("POST /api/notifications/read - user: {}", user.user_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.notification_service.mark_read(&ctx).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Failed to mark notifications read: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error marking notifications read").into_response()
        }
    }
}
