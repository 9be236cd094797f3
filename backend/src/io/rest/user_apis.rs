//! # REST API for Users
//!
//! Registration and login. Login pulls the user's records from the remote
//! before answering, so the response says whether that pull succeeded.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use crate::AppState;
use shared::{LoginRequest, RegisterUserRequest};

/// Register a new user
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterUserRequest>,
) -> impl IntoResponse {
    info!("POST /api/users/register - user: {}", request.user_id);

    match state.user_service.register(request).await {
        Ok(response) if response.success => (StatusCode::CREATED, Json(response)).into_response(),
        Ok(response) => (StatusCode::BAD_REQUEST, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to register user: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error registering user").into_response()
        }
    }
}

/// Log in and pull the user's records
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    info!("POST /api/users/login - user: {}", request.user_id);

    match state.user_service.login(request).await {
        Ok((response, Some(_))) => (StatusCode::OK, Json(response)).into_response(),
        Ok((response, None)) => (StatusCode::UNAUTHORIZED, Json(response)).into_response(),
        Err(e) => {
            error!("Failed to log in: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error logging in").into_response()
        }
    }
}
