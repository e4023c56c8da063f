//! Torznab search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::request::{empty_result, fetch_feed};
use super::{
    effective_categories, Indexer, IndexerProtocol, IndexerSearchResult, ProtocolSearcher,
    SearchError, SearchParams,
};

/// Searches torrent indexers over the Torznab API.
pub struct TorznabClient {
    client: Client,
}

impl TorznabClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProtocolSearcher for TorznabClient {
    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::Torznab
    }

    async fn search(
        &self,
        indexer: &Indexer,
        params: &SearchParams,
    ) -> Result<IndexerSearchResult, SearchError> {
        let Some(categories) = effective_categories(&indexer.categories, &params.categories) else {
            debug!(indexer = %indexer.name, "No shared categories, skipping indexer");
            return Ok(empty_result(indexer));
        };

        let mut result = fetch_feed(&self.client, indexer, params, &categories).await?;

        // Magnet-only trackers leave <link> empty and advertise the magnet as an attr.
        for item in result.items.iter_mut() {
            if item.link.is_empty() {
                if let Some(magnet) = &item.magnet_url {
                    item.link = magnet.clone();
                }
            }
            if item.info_hash.is_none() {
                item.info_hash = item.magnet_url.as_deref().and_then(btih_from_magnet);
            }
        }

        Ok(result)
    }
}

/// Extract the lowercase btih from a magnet URI.
pub fn btih_from_magnet(magnet: &str) -> Option<String> {
    let query = magnet.strip_prefix("magnet:?")?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "xt" && value.starts_with("urn:btih:"))
        .map(|(_, value)| value.trim_start_matches("urn:btih:").to_lowercase())
        .filter(|hash| !hash.is_empty())
}
