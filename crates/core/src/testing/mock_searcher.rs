//! Mock protocol searcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::searcher::{
    Indexer, IndexerProtocol, IndexerSearchResult, ProtocolSearcher, RawSearchItem, SearchError,
    SearchParams,
};

/// A recorded search for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSearch {
    pub indexer_id: String,
    pub params: SearchParams,
}

/// Mock implementation of the ProtocolSearcher trait.
///
/// Results, failures and delays are configured per indexer id. An indexer
/// with nothing configured answers with an empty feed.
///
/// # Example
///
/// ```rust,ignore
/// let torznab = MockProtocolSearcher::new(IndexerProtocol::Torznab);
/// torznab.set_items("idx-1", vec![fixtures::raw_item("Game", "2024-01-01")]).await;
/// torznab.fail_indexer("idx-2", SearchError::Timeout).await;
///
/// let aggregator = SearchAggregator::new(Arc::new(torznab), Arc::new(newznab), timeout);
/// ```
#[derive(Debug, Clone)]
pub struct MockProtocolSearcher {
    protocol: IndexerProtocol,
    items: Arc<RwLock<HashMap<String, Vec<RawSearchItem>>>>,
    failures: Arc<RwLock<HashMap<String, SearchError>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    searches: Arc<RwLock<Vec<RecordedSearch>>>,
}

impl MockProtocolSearcher {
    pub fn new(protocol: IndexerProtocol) -> Self {
        Self {
            protocol,
            items: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            searches: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Items returned, in this order, for `indexer_id`.
    pub async fn set_items(&self, indexer_id: &str, items: Vec<RawSearchItem>) {
        self.items.write().await.insert(indexer_id.to_string(), items);
    }

    /// Make every search of `indexer_id` fail with `error`.
    pub async fn fail_indexer(&self, indexer_id: &str, error: SearchError) {
        self.failures
            .write()
            .await
            .insert(indexer_id.to_string(), error);
    }

    /// Delay answers for `indexer_id`.
    pub async fn delay_indexer(&self, indexer_id: &str, delay: Duration) {
        self.delays
            .write()
            .await
            .insert(indexer_id.to_string(), delay);
    }

    /// Searches received so far.
    pub async fn recorded_searches(&self) -> Vec<RecordedSearch> {
        self.searches.read().await.clone()
    }

    pub async fn search_count(&self) -> usize {
        self.searches.read().await.len()
    }
}

#[async_trait]
impl ProtocolSearcher for MockProtocolSearcher {
    fn protocol(&self) -> IndexerProtocol {
        self.protocol
    }

    async fn search(
        &self,
        indexer: &Indexer,
        params: &SearchParams,
    ) -> Result<IndexerSearchResult, SearchError> {
        self.searches.write().await.push(RecordedSearch {
            indexer_id: indexer.id.clone(),
            params: params.clone(),
        });

        let delay = self.delays.read().await.get(&indexer.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.read().await.get(&indexer.id) {
            return Err(error.clone());
        }

        let items = self
            .items
            .read()
            .await
            .get(&indexer.id)
            .cloned()
            .unwrap_or_default();

        Ok(IndexerSearchResult {
            indexer_id: indexer.id.clone(),
            indexer_name: indexer.name.clone(),
            total: items.len() as u64,
            items,
        })
    }
}
