//! # REST API for Growth Records

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use super::{domain_error, session, SessionUserHeader};
use crate::AppState;
use shared::{RecordId, SaveGrowthRequest};

/// Record a measurement; answers with the full growth history
pub async fn save_growth_entry(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<SaveGrowthRequest>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/growth - request: {:?}", child_id, request);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .growth_service
        .save_entry(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(entries) => (StatusCode::CREATED, Json(entries)).into_response(),
        Err(e) => domain_error("Failed to save growth entry", e, StatusCode::BAD_REQUEST),
    }
}

pub async fn growth_history(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/growth", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .growth_service
        .history_for_child(&ctx, &RecordId::from(child_id))
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            error!("Failed to list growth history: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing growth history").into_response()
        }
    }
}

pub async fn delete_growth_entry(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path((child_id, entry_id)): Path<(String, String)>,
) -> impl IntoResponse {
    info!("DELETE /api/children/{}/growth/{}", child_id, entry_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .growth_service
        .delete_entry(&ctx, &RecordId::from(child_id), &RecordId::from(entry_id))
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            error!("Failed to delete growth entry: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error deleting growth entry").into_response()
        }
    }
}
