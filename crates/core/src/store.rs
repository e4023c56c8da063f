//! Config store collaborator.
//!
//! Indexers and downloaders are read fresh on every operation; nothing in
//! the acquisition layer caches them across calls.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::downloader::DownloaderConfig;
use crate::searcher::{Indexer, IndexerProtocol};

/// Errors returned by a config store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Indexer {id} is {}; its protocol cannot change to {}",
        .saved.as_str(),
        .requested.as_str()
    )]
    ProtocolChange {
        id: String,
        saved: IndexerProtocol,
        requested: IndexerProtocol,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Read access to configured indexers and downloaders.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Enabled indexers, ascending by priority.
    async fn get_enabled_indexers(&self) -> Result<Vec<Indexer>, StoreError>;

    /// Enabled downloaders, ascending by priority.
    async fn get_enabled_downloaders(&self) -> Result<Vec<DownloaderConfig>, StoreError>;

    async fn get_indexer(&self, id: &str) -> Result<Option<Indexer>, StoreError>;

    async fn get_downloader(&self, id: &str) -> Result<Option<DownloaderConfig>, StoreError>;
}

/// In-memory store seeded from the configuration file.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    indexers: RwLock<Vec<Indexer>>,
    downloaders: RwLock<Vec<DownloaderConfig>>,
}

impl InMemoryConfigStore {
    pub fn new(indexers: Vec<Indexer>, downloaders: Vec<DownloaderConfig>) -> Self {
        Self {
            indexers: RwLock::new(indexers),
            downloaders: RwLock::new(downloaders),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.indexers.clone(), config.downloaders.clone())
    }

    /// Insert or replace an indexer by id. The protocol of a saved indexer
    /// is fixed.
    pub async fn upsert_indexer(&self, indexer: Indexer) -> Result<(), StoreError> {
        let mut indexers = self.indexers.write().await;
        match indexers.iter_mut().find(|i| i.id == indexer.id) {
            Some(existing) if existing.protocol != indexer.protocol => {
                Err(StoreError::ProtocolChange {
                    id: indexer.id,
                    saved: existing.protocol,
                    requested: indexer.protocol,
                })
            }
            Some(existing) => {
                *existing = indexer;
                Ok(())
            }
            None => {
                indexers.push(indexer);
                Ok(())
            }
        }
    }

    /// Insert or replace a downloader by id.
    pub async fn upsert_downloader(&self, downloader: DownloaderConfig) {
        let mut downloaders = self.downloaders.write().await;
        match downloaders.iter_mut().find(|d| d.id == downloader.id) {
            Some(existing) => *existing = downloader,
            None => downloaders.push(downloader),
        }
    }

    pub async fn remove_indexer(&self, id: &str) -> Result<(), StoreError> {
        let mut indexers = self.indexers.write().await;
        let before = indexers.len();
        indexers.retain(|i| i.id != id);
        if indexers.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn remove_downloader(&self, id: &str) -> Result<(), StoreError> {
        let mut downloaders = self.downloaders.write().await;
        let before = downloaders.len();
        downloaders.retain(|d| d.id != id);
        if downloaders.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_enabled_indexers(&self) -> Result<Vec<Indexer>, StoreError> {
        let mut enabled: Vec<Indexer> = self
            .indexers
            .read()
            .await
            .iter()
            .filter(|i| i.enabled)
            .cloned()
            .collect();
        // Stable, so equal priorities keep insertion order.
        enabled.sort_by_key(|i| i.priority);
        Ok(enabled)
    }

    async fn get_enabled_downloaders(&self) -> Result<Vec<DownloaderConfig>, StoreError> {
        let mut enabled: Vec<DownloaderConfig> = self
            .downloaders
            .read()
            .await
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|d| d.priority);
        Ok(enabled)
    }

    async fn get_indexer(&self, id: &str) -> Result<Option<Indexer>, StoreError> {
        Ok(self.indexers.read().await.iter().find(|i| i.id == id).cloned())
    }

    async fn get_downloader(&self, id: &str) -> Result<Option<DownloaderConfig>, StoreError> {
        Ok(self
            .downloaders
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }
}
