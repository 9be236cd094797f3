//! # REST API for Health Status
//!
//! Milestone checklist, vaccination doses and categorized health records of
//! a child. Every write answers with the child's current state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use super::{domain_error, session, SessionUserHeader};
use crate::AppState;
use shared::{HealthCategory, HealthRecordRequest, RecordId, ToggleChecklistRequest, ToggleVaccinationRequest};

#[derive(Debug, Deserialize)]
pub struct CategoryFilter {
    pub category: Option<HealthCategory>,
}

pub async fn checked_items(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/checklist", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state.health_service.checked_items(&ctx, &RecordId::from(child_id)).await {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => {
            error!("Failed to read checklist: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading checklist").into_response()
        }
    }
}

pub async fn toggle_checklist_item(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<ToggleChecklistRequest>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/checklist - request: {:?}", child_id, request);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .toggle_checklist_item(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(e) => {
            error!("Failed to toggle checklist item: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error updating checklist").into_response()
        }
    }
}

pub async fn vaccination_records(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/vaccinations", child_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .vaccination_records(&ctx, &RecordId::from(child_id))
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!("Failed to read vaccinations: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading vaccinations").into_response()
        }
    }
}

pub async fn toggle_vaccination(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<ToggleVaccinationRequest>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/vaccinations - request: {:?}", child_id, request);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .toggle_vaccination(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!("Failed to toggle vaccination: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error updating vaccinations").into_response()
        }
    }
}

/// Health records, optionally narrowed with `?category=`
pub async fn health_records(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Query(filter): Query<CategoryFilter>,
) -> impl IntoResponse {
    info!("GET /api/children/{}/health - filter: {:?}", child_id, filter);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let child_id = RecordId::from(child_id);
    let result = match filter.category {
        Some(category) => {
            state
                .health_service
                .health_records_by_category(&ctx, &child_id, category)
                .await
        }
        None => state.health_service.health_records(&ctx, &child_id).await,
    };

    match result {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!("Failed to list health records: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing health records").into_response()
        }
    }
}

pub async fn add_health_record(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path(child_id): Path<String>,
    Json(request): Json<HealthRecordRequest>,
) -> impl IntoResponse {
    info!("POST /api/children/{}/health - category: {:?}", child_id, request.category);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .add_health_record(&ctx, &RecordId::from(child_id), request)
        .await
    {
        Ok(records) => (StatusCode::CREATED, Json(records)).into_response(),
        Err(e) => domain_error("Failed to add health record", e, StatusCode::BAD_REQUEST),
    }
}

pub async fn update_health_record(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path((child_id, record_id)): Path<(String, String)>,
    Json(updates): Json<Map<String, Value>>,
) -> impl IntoResponse {
    info!("PUT /api/children/{}/health/{}", child_id, record_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .update_health_record(&ctx, &RecordId::from(child_id), &RecordId::from(record_id), updates)
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => domain_error("Failed to update health record", e, StatusCode::BAD_REQUEST),
    }
}

pub async fn delete_health_record(
    State(state): State<AppState>,
    SessionUserHeader(user): SessionUserHeader,
    Path((child_id, record_id)): Path<(String, String)>,
) -> impl IntoResponse {
    info!("DELETE /api/children/{}/health/{}", child_id, record_id);
    let ctx = match session(&state, user).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match state
        .health_service
        .delete_health_record(&ctx, &RecordId::from(child_id), &RecordId::from(record_id))
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            error!("Failed to delete health record: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error deleting health record").into_response()
        }
    }
}
