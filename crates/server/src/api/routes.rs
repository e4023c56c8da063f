use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{downloaders, downloads, handlers, middleware::metrics_middleware, search};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Search across every enabled indexer
        .route("/search", get(search::search))
        // Downloads across every enabled downloader
        .route(
            "/downloads",
            post(downloads::add_download).get(downloads::list_all_downloads),
        )
        // One downloader, addressed by id
        .route("/downloaders/test", post(downloaders::test_downloader))
        .route("/downloaders/{id}/test", post(downloaders::test_stored_downloader))
        .route("/downloaders/{id}/free-space", get(downloaders::free_space))
        .route("/downloaders/{id}/downloads", get(downloaders::list_downloads))
        .route(
            "/downloaders/{id}/downloads/{native_id}",
            get(downloaders::get_download).delete(downloaders::remove_download),
        )
        .route(
            "/downloaders/{id}/downloads/{native_id}/details",
            get(downloaders::get_details),
        )
        .route(
            "/downloaders/{id}/downloads/{native_id}/pause",
            post(downloaders::pause_download),
        )
        .route(
            "/downloaders/{id}/downloads/{native_id}/resume",
            post(downloaders::resume_download),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
}
