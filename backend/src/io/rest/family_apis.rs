//! # REST API for Family Groups

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use super::{session, SessionUserHeader};
use crate::AppState;
use shared::{JoinFamilyRequest, RecordId};

/// The family group sharing a child
pub async fn family_for_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/family", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .family_group_service
        .family_for(&ctx, &RecordId::from(child_id))
        .await
    {
        Ok(Some(group)) => (StatusCode::OK, Json(group)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Family group not found").into_response(),
        Err(e) => {
            error!("Failed to get family group: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error retrieving family group").into_response()
        }
    }
}

/// Join a family group with an invite code
pub async fn join_family(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Json(request): Json<JoinFamilyRequest>,
) -> impl IntoResponse {
    info!("POST /api/family/join - user: {}", user.user_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let response = state.family_group_service.join_group(&ctx, &request.invite_code).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response)).into_response()
}
