//! Health and metrics endpoints

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use prometheus::Registry;

use crate::api::error::ApiResult;
use crate::api::types::HealthResponse;
use crate::metrics;

/// GET /-/healthy
pub async fn healthy() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /metrics
pub async fn export_metrics(State(registry): State<Registry>) -> ApiResult<impl IntoResponse> {
    let body = metrics::encode(&registry)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
