//! # REST API for Child Management
//!
//! Endpoints for registering, listing, editing, deleting and selecting children.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use super::{domain_error, session, SessionUserHeader};
use crate::AppState;
use shared::{CreateChildRequest, RecordId, UpdateChildRequest};

/// Register a new child for the caller
pub async fn register_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Json(request): Json<CreateChildRequest>,
) -> impl IntoResponse {
    info!("POST /api/children - request: {:?}", request);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.child_service.register_child(&ctx, request).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => domain_error("Failed to register child", e, StatusCode::BAD_REQUEST),
    }
}

/// Get a child by ID
pub async fn get_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.child_service.get_child(&ctx, &RecordId::from(child_id)).await {
        Ok(Some(child)) => (StatusCode::OK, Json(child)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Child not found").into_response(),
        Err(e) => {
            error!("Failed to get child: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error retrieving child").into_response()
        }
    }
}

/// List the children the caller can access
pub async fn list_children(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
) -> impl IntoResponse {
    info!("GET /api/children - user: {}", user.user_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.child_service.list_children(&ctx).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to list children: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing children").into_response()
        }
    }
}

/// Update a child
pub async fn update_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<UpdateChildRequest>,
) -> impl IntoResponse {
    info!("PUT /api/children/{} - request: {:?}", child_id, request);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .child_service
        .update_child(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => domain_error("Failed to update child", e, StatusCode::BAD_REQUEST),
    }
}

/// Delete a child and all of its records
pub async fn delete_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("DELETE /api/children/{}", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.child_service.delete_child(&ctx, &RecordId::from(child_id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Child not found").into_response(),
        Err(e) => {
            error!("Failed to delete child: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error deleting child").into_response()
        }
    }
}

/// Switch the caller's selected child and pull its records
pub async fn select_child(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/select", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.child_service.select_child(&ctx, &RecordId::from(child_id)).await {
        Ok(response) if response.success => (StatusCode::OK, Json(response)).into_response(),
        Ok(response) => (StatusCode::FORBIDDEN, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to select child: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error selecting child").into_response()
        }
    }
}
