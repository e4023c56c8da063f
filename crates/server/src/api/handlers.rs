use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use gamearr_core::{DownloaderError, SanitizedConfig, ServiceError};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::metrics::encode_metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error tuple returned by handlers.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Map a service failure to an HTTP status.
///
/// Unknown ids are 404; an unreachable or failing backend is 502; broken
/// configuration is a server fault.
pub fn service_error(e: ServiceError) -> ApiError {
    let status = match &e {
        ServiceError::DownloaderNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Downloader(DownloaderError::NotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Downloader(DownloaderError::NotSupported { .. }) => {
            StatusCode::NOT_IMPLEMENTED
        }
        ServiceError::Downloader(DownloaderError::InvalidConfig(_)) | ServiceError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ServiceError::Downloader(_) => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        warn!(error = %e, status = status.as_u16(), "Request failed");
    }
    api_error(status, e.to_string())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// GET /api/v1/metrics
///
/// Prometheus text exposition format.
pub async fn get_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
