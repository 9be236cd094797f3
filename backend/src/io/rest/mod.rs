//! # REST API Interface Layer
//!
//! HTTP endpoints over the domain services. This layer handles:
//! - JSON request/response serialization
//! - Resolving the calling user into a session context
//! - Translating domain errors into HTTP status codes
//!
//! Callers identify themselves with the `x-user-id` header (and optionally
//! `x-user-name`), which is what a signed-in client sends after `/users/login`.
//! The selected child is restored from the local cache on every request.

pub mod child_apis;
pub mod family_apis;
pub mod growth_apis;
pub mod health_apis;
pub mod log_apis;
pub mod sync_apis;
pub mod user_apis;

#[cfg(test)]
mod tests;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::domain::SessionContext;
use crate::AppState;
use shared::SessionUser;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// The signed-in user named by the request headers
#[derive(Debug, Clone)]
pub struct SessionUserHeader(pub SessionUser);

#[async_trait]
impl<S> FromRequestParts<S> for SessionUserHeader
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER).ok_or((StatusCode::UNAUTHORIZED, "Missing x-user-id header"))?;
        let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| user_id.clone());
        Ok(Self(SessionUser { user_id, display_name }))
    }
}

/// Build the session context for a request, restoring the selected child
pub(crate) async fn session(state: &AppState, user: SessionUser) -> Result<SessionContext, Response> {
    state.child_service.session_for(user).await.map_err(|e| {
        error!("Failed to restore session: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Error restoring session").into_response()
    })
}

/// Map a domain error to a response; "not found" messages become 404
pub(crate) fn domain_error(context: &str, e: anyhow::Error, fallback: StatusCode) -> Response {
    error!("{}: {}", context, e);
    let status = if e.to_string().contains("not found") {
        StatusCode::NOT_FOUND
    } else {
        fallback
    };
    (status, e.to_string()).into_response()
}
