//! Newznab search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::request::{empty_result, fetch_feed};
use super::{
    effective_categories, Indexer, IndexerProtocol, IndexerSearchResult, ProtocolSearcher,
    SearchError, SearchParams,
};

/// Searches usenet indexers over the Newznab API.
pub struct NewznabClient {
    client: Client,
}

impl NewznabClient {
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
impl ProtocolSearcher for NewznabClient {
    fn protocol(&self) -> IndexerProtocol {
        IndexerProtocol::Newznab
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

        // Posts without a usenet date fall back to the RSS publish date.
        for item in result.items.iter_mut() {
            if item.usenet_date.is_none() {
                item.usenet_date = item.pub_date;
            }
        }

        Ok(result)
    }
}
