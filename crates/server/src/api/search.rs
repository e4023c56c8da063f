//! Search API handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use gamearr_core::AggregatedSearchResults;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    /// Comma-separated category ids.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl SearchRequest {
    fn categories(&self) -> Vec<String> {
        self.category
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }
}

/// GET /api/v1/search
///
/// Search every enabled indexer. Always 200: indexer failures and the
/// no-indexers condition are reported in `errors`.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(request): Query<SearchRequest>,
) -> Json<AggregatedSearchResults> {
    let categories = request.categories();
    Json(
        state
            .service()
            .search(&request.query, categories, request.limit, request.offset)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_list_parsing() {
        let request = SearchRequest {
            query: "game".into(),
            category: Some("4000, 4050,,".into()),
            limit: None,
            offset: None,
        };
        assert_eq!(request.categories(), vec!["4000", "4050"]);

        let none = SearchRequest {
            query: "game".into(),
            category: None,
            limit: None,
            offset: None,
        };
        assert!(none.categories().is_empty());
    }
}
