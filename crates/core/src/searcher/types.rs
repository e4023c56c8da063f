//! Types for the indexer search system.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Which acquisition family a release or client belongs to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    #[default]
    Torrent,
    Usenet,
}

impl DownloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadType::Torrent => "torrent",
            DownloadType::Usenet => "usenet",
        }
    }
}

/// Wire protocol spoken by an indexer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndexerProtocol {
    #[default]
    Torznab,
    Newznab,
}

impl IndexerProtocol {
    /// The family every item produced through this protocol is stamped with.
    pub fn family(&self) -> DownloadType {
        match self {
            IndexerProtocol::Torznab => DownloadType::Torrent,
            IndexerProtocol::Newznab => DownloadType::Usenet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerProtocol::Torznab => "torznab",
            IndexerProtocol::Newznab => "newznab",
        }
    }
}

/// A configured search backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Indexer {
    pub id: String,
    pub name: String,
    /// Base URL of the indexer API.
    pub url: String,
    pub api_key: String,
    /// Fixed for the lifetime of the record.
    #[serde(default)]
    pub protocol: IndexerProtocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower runs first when listing; no exclusivity.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Newznab category ids this indexer is restricted to (empty = all).
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub rss_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_search_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    50
}

/// Parameters of a single search request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    pub query: String,
    /// Requested categories (empty = no restriction).
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            categories: Vec::new(),
            limit: default_limit(),
            offset: 0,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

fn default_limit() -> u32 {
    50
}

/// Intersect an indexer's own category list with the requested one.
///
/// Returns `None` when both lists are non-empty and share nothing, meaning
/// the indexer has nothing to contribute. An empty vector means "no
/// category parameter".
pub fn effective_categories(indexer: &[String], requested: &[String]) -> Option<Vec<String>> {
    match (indexer.is_empty(), requested.is_empty()) {
        (true, true) => Some(Vec::new()),
        (true, false) => Some(requested.to_vec()),
        (false, true) => Some(indexer.to_vec()),
        (false, false) => {
            let shared: Vec<String> = requested
                .iter()
                .filter(|c| indexer.contains(c))
                .cloned()
                .collect();
            if shared.is_empty() {
                None
            } else {
                Some(shared)
            }
        }
    }
}

/// One item as parsed from an indexer feed, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSearchItem {
    pub title: String,
    pub link: String,
    pub guid: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    pub categories: Vec<String>,
    pub comments: Option<String>,
    // Torznab attributes
    pub seeders: Option<u32>,
    pub peers: Option<u32>,
    pub info_hash: Option<String>,
    pub magnet_url: Option<String>,
    // Newznab attributes
    pub grabs: Option<u32>,
    pub poster: Option<String>,
    pub group: Option<String>,
    pub usenet_date: Option<DateTime<Utc>>,
}

/// Result of searching one indexer.
#[derive(Debug, Clone, Default)]
pub struct IndexerSearchResult {
    pub indexer_id: String,
    pub indexer_name: String,
    /// In the order the indexer returned them.
    pub items: Vec<RawSearchItem>,
    /// Total reported by the indexer, or the item count.
    pub total: u64,
}

/// Combined result of one protocol family.
#[derive(Debug, Clone, Default)]
pub struct FamilySearchResult {
    pub results: Vec<IndexerSearchResult>,
    pub total: u64,
    /// One `"<indexer-name>: <reason>"` entry per failed indexer.
    pub errors: Vec<String>,
}

/// Protocol-specific fields of a normalized item, tagged by family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "downloadType", rename_all = "lowercase")]
pub enum SearchPayload {
    #[serde(rename_all = "camelCase")]
    Torrent {
        seeders: u32,
        leechers: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        magnet_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Usenet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grabs: Option<u32>,
        /// Days since the post hit usenet.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        age: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poster: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
}

/// A candidate release in the unified shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    pub title: String,
    /// URL of the payload (`.torrent`, magnet or NZB).
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub indexer_id: String,
    pub indexer_name: String,
    #[serde(default, rename = "category")]
    pub categories: Vec<String>,
    pub guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(flatten)]
    pub payload: SearchPayload,
}

impl SearchItem {
    pub fn download_type(&self) -> DownloadType {
        match self.payload {
            SearchPayload::Torrent { .. } => DownloadType::Torrent,
            SearchPayload::Usenet { .. } => DownloadType::Usenet,
        }
    }
}

/// Aggregated result of a search across every enabled indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSearchResults {
    pub items: Vec<SearchItem>,
    pub total: u64,
    pub offset: u32,
    pub errors: Vec<String>,
}

/// Errors that can occur during search operations.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Indexer error {code}: {description}")]
    IndexerError { code: String, description: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Config store error: {0}")]
    Store(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_connect() {
            SearchError::ConnectionFailed(e.to_string())
        } else {
            SearchError::ApiError(e.to_string())
        }
    }
}

/// Format a branch failure as `"<name>: <reason>"`, without
/// doubling the prefix when the reason already carries it.
pub fn labelled_error(name: &str, reason: &str) -> String {
    let prefix = format!("{}:", name);
    if reason.starts_with(&prefix) {
        reason.to_string()
    } else {
        format!("{} {}", prefix, reason)
    }
}

/// Search client for one indexer protocol family.
#[async_trait]
pub trait ProtocolSearcher: Send + Sync {
    /// Protocol this client speaks.
    fn protocol(&self) -> IndexerProtocol;

    /// Search a single indexer.
    async fn search(
        &self,
        indexer: &Indexer,
        params: &SearchParams,
    ) -> Result<IndexerSearchResult, SearchError>;

    /// Search every given indexer concurrently.
    ///
    /// Never fails: each indexer's error or timeout becomes one entry in
    /// `errors` and that indexer contributes no items.
    async fn search_multiple(
        &self,
        indexers: &[Indexer],
        params: &SearchParams,
        timeout: Duration,
    ) -> FamilySearchResult {
        let futures = indexers.iter().map(|indexer| async move {
            let result = match tokio::time::timeout(timeout, self.search(indexer, params)).await {
                Ok(result) => result,
                Err(_) => Err(SearchError::Timeout),
            };
            (indexer, result)
        });

        let mut family = FamilySearchResult::default();
        for (indexer, result) in join_all(futures).await {
            match result {
                Ok(result) => {
                    debug!(
                        indexer = %indexer.name,
                        protocol = self.protocol().as_str(),
                        items = result.items.len(),
                        "Indexer search complete"
                    );
                    family.total += result.total;
                    family.results.push(result);
                }
                Err(e) => {
                    warn!(indexer = %indexer.name, error = %e, "Indexer search failed");
                    family.errors.push(labelled_error(&indexer.name, &e.to_string()));
                }
            }
        }
        family
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_item() -> SearchItem {
        SearchItem {
            title: "Foo Bar 1".to_string(),
            link: "http://indexer/download/1.torrent".to_string(),
            pub_date: None,
            size: Some(1024),
            indexer_id: "idx-1".to_string(),
            indexer_name: "Torznab".to_string(),
            categories: vec!["4050".to_string()],
            guid: "guid-1".to_string(),
            comments: None,
            payload: SearchPayload::Torrent {
                seeders: 10,
                leechers: 2,
                info_hash: None,
                magnet_url: None,
            },
        }
    }

    #[test]
    fn test_effective_categories_no_filters() {
        assert_eq!(effective_categories(&[], &[]), Some(vec![]));
    }

    #[test]
    fn test_effective_categories_caller_only() {
        let requested = vec!["4000".to_string()];
        assert_eq!(effective_categories(&[], &requested), Some(requested.clone()));
    }

    #[test]
    fn test_effective_categories_indexer_only() {
        let own = vec!["4050".to_string()];
        assert_eq!(effective_categories(&own, &[]), Some(own.clone()));
    }

    #[test]
    fn test_effective_categories_intersection() {
        let own = vec!["4000".to_string(), "4050".to_string()];
        let requested = vec!["4050".to_string(), "1000".to_string()];
        assert_eq!(
            effective_categories(&own, &requested),
            Some(vec!["4050".to_string()])
        );
    }

    #[test]
    fn test_effective_categories_disjoint() {
        let own = vec!["4050".to_string()];
        let requested = vec!["2000".to_string()];
        assert_eq!(effective_categories(&own, &requested), None);
    }

    #[test]
    fn test_labelled_error_prefix() {
        assert_eq!(labelled_error("A", "HTTP 401"), "A: HTTP 401");
        assert_eq!(labelled_error("A", "A: HTTP 401"), "A: HTTP 401");
    }

    #[test]
    fn test_protocol_family() {
        assert_eq!(IndexerProtocol::Torznab.family(), DownloadType::Torrent);
        assert_eq!(IndexerProtocol::Newznab.family(), DownloadType::Usenet);
    }

    #[test]
    fn test_search_item_serialization_torrent() {
        let json = serde_json::to_value(torrent_item()).unwrap();
        assert_eq!(json["downloadType"], "torrent");
        assert_eq!(json["seeders"], 10);
        assert_eq!(json["leechers"], 2);
        assert_eq!(json["indexerId"], "idx-1");
        assert_eq!(json["category"][0], "4050");
        assert!(json.get("grabs").is_none());
    }

    #[test]
    fn test_search_item_serialization_usenet() {
        let mut item = torrent_item();
        item.payload = SearchPayload::Usenet {
            grabs: Some(5),
            age: Some(2),
            poster: Some("poster@example.com".to_string()),
            group: None,
        };
        assert_eq!(item.download_type(), DownloadType::Usenet);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["downloadType"], "usenet");
        assert_eq!(json["grabs"], 5);
        assert_eq!(json["age"], 2);
        assert!(json.get("seeders").is_none());

        let parsed: SearchItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.download_type(), DownloadType::Usenet);
    }

    #[test]
    fn test_indexer_defaults() {
        let json = r#"{"id":"1","name":"N","url":"http://x","api_key":"k"}"#;
        let indexer: Indexer = serde_json::from_str(json).unwrap();
        assert_eq!(indexer.protocol, IndexerProtocol::Torznab);
        assert!(indexer.enabled);
        assert_eq!(indexer.priority, 50);
        assert!(indexer.categories.is_empty());
    }

    #[test]
    fn test_aggregated_results_shape() {
        let results = AggregatedSearchResults {
            items: vec![],
            total: 0,
            offset: 0,
            errors: vec!["No indexers configured".to_string()],
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["items"], serde_json::json!([]));
        assert_eq!(json["total"], 0);
        assert_eq!(json["offset"], 0);
        assert_eq!(json["errors"][0], "No indexers configured");
    }
}
