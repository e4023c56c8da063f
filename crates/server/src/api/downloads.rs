//! Download API handlers spanning every enabled downloader.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use gamearr_core::{
    downloader::AggregatedDownloads, AddDownloadRequest, DispatchResult, GameDownloadLink,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::handlers::{service_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadBody {
    #[serde(flatten)]
    pub request: AddDownloadRequest,
    /// When set, an accepted dispatch also returns the game link record.
    #[serde(default)]
    pub game_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadResponse {
    #[serde(flatten)]
    pub result: DispatchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_download: Option<GameDownloadLink>,
}

/// POST /api/v1/downloads
///
/// Try enabled downloaders in priority order. 200 when one accepted or
/// none are configured, 500 with the attempt list when all failed.
pub async fn add_download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddDownloadBody>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .service()
        .add_download(&body.request)
        .await
        .map_err(service_error)?;

    let game_download = body
        .game_id
        .as_deref()
        .and_then(|game_id| GameDownloadLink::from_dispatch(game_id, &body.request, &result));
    if let Some(link) = &game_download {
        info!(game_id = %link.game_id, downloader = %link.downloader_id, "Download linked to game");
    }

    let status = match result {
        DispatchResult::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    Ok((
        status,
        Json(AddDownloadResponse {
            result,
            game_download,
        }),
    ))
}

/// GET /api/v1/downloads
pub async fn list_all_downloads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AggregatedDownloads>, ApiError> {
    state
        .service()
        .list_all_downloads()
        .await
        .map(Json)
        .map_err(service_error)
}
