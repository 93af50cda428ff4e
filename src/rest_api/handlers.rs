//! HTTP handlers for the REST API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use crate::controller::conditions::CONDITION_STATUS_TRUE;

use super::dto::{ApiServiceListResponse, ApiServiceSummary, ErrorResponse, HealthResponse};
use super::server::ApiState;

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all cached APIServices with their availability
#[instrument(skip_all)]
pub async fn list_apiservices(State(state): State<ApiState>) -> Json<ApiServiceListResponse> {
    let mut items: Vec<ApiServiceSummary> = state
        .apiservices
        .list()
        .iter()
        .map(|a| ApiServiceSummary::from(a.as_ref()))
        .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));

    let total = items.len();
    let unavailable = items
        .iter()
        .filter(|i| i.available != CONDITION_STATUS_TRUE)
        .count();
    Json(ApiServiceListResponse {
        items,
        total,
        unavailable,
    })
}

/// Get a single APIService
#[instrument(skip_all, fields(name = %name))]
pub async fn get_apiservice(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ApiServiceSummary>, (StatusCode, Json<ErrorResponse>)> {
    match state.apiservices.lookup(None, &name) {
        Some(apiservice) => Ok(Json(ApiServiceSummary::from(apiservice.as_ref()))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("APIService {name} not found"),
            )),
        )),
    }
}
