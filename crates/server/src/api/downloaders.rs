//! Per-downloader API handlers. These never fall back to another
//! downloader: the id in the path owns the download.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use gamearr_core::{
    downloader::{ActionResult, ConnectionTest, DownloadDetails, DownloadStatus, FreeSpace},
    TestTarget,
};
use serde::Deserialize;

use super::handlers::{api_error, service_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveParams {
    #[serde(default)]
    pub delete_files: bool,
}

/// POST /api/v1/downloaders/test
///
/// Body is either `{ "id": ".." }` or a full, possibly unsaved, downloader
/// config.
pub async fn test_downloader(
    State(state): State<Arc<AppState>>,
    Json(target): Json<TestTarget>,
) -> Result<Json<ConnectionTest>, ApiError> {
    state
        .service()
        .test_downloader(target)
        .await
        .map(Json)
        .map_err(service_error)
}

/// POST /api/v1/downloaders/{id}/test
pub async fn test_stored_downloader(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionTest>, ApiError> {
    state
        .service()
        .test_downloader(TestTarget::Id { id })
        .await
        .map(Json)
        .map_err(service_error)
}

/// GET /api/v1/downloaders/{id}/free-space
pub async fn free_space(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FreeSpace>, ApiError> {
    state
        .service()
        .free_space(&id)
        .await
        .map(Json)
        .map_err(service_error)
}

/// GET /api/v1/downloaders/{id}/downloads
pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DownloadStatus>>, ApiError> {
    state
        .service()
        .list_downloads(&id)
        .await
        .map(Json)
        .map_err(service_error)
}

/// GET /api/v1/downloaders/{id}/downloads/{native_id}
pub async fn get_download(
    State(state): State<Arc<AppState>>,
    Path((id, native_id)): Path<(String, String)>,
) -> Result<Json<DownloadStatus>, ApiError> {
    match state.service().get_download(&id, &native_id).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Download not found: {}", native_id),
        )),
        Err(e) => Err(service_error(e)),
    }
}

/// GET /api/v1/downloaders/{id}/downloads/{native_id}/details
pub async fn get_details(
    State(state): State<Arc<AppState>>,
    Path((id, native_id)): Path<(String, String)>,
) -> Result<Json<DownloadDetails>, ApiError> {
    match state.service().get_details(&id, &native_id).await {
        Ok(Some(details)) => Ok(Json(details)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Download not found: {}", native_id),
        )),
        Err(e) => Err(service_error(e)),
    }
}

/// POST /api/v1/downloaders/{id}/downloads/{native_id}/pause
pub async fn pause_download(
    State(state): State<Arc<AppState>>,
    Path((id, native_id)): Path<(String, String)>,
) -> Result<Json<ActionResult>, ApiError> {
    state
        .service()
        .pause(&id, &native_id)
        .await
        .map(Json)
        .map_err(service_error)
}

/// POST /api/v1/downloaders/{id}/downloads/{native_id}/resume
pub async fn resume_download(
    State(state): State<Arc<AppState>>,
    Path((id, native_id)): Path<(String, String)>,
) -> Result<Json<ActionResult>, ApiError> {
    state
        .service()
        .resume(&id, &native_id)
        .await
        .map(Json)
        .map_err(service_error)
}

/// DELETE /api/v1/downloaders/{id}/downloads/{native_id}?deleteFiles=true
pub async fn remove_download(
    State(state): State<Arc<AppState>>,
    Path((id, native_id)): Path<(String, String)>,
    Query(params): Query<RemoveParams>,
) -> Result<Json<ActionResult>, ApiError> {
    state
        .service()
        .remove(&id, &native_id, params.delete_files)
        .await
        .map(Json)
        .map_err(service_error)
}
