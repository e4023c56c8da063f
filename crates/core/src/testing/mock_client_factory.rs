//! Mock client factory for testing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::MockDownloadClient;
use crate::downloader::{ClientFactory, DownloadClient, DownloaderConfig, DownloaderError};

/// Hands out pre-registered mock clients by downloader id.
///
/// Creating a client for an id that was never registered fails with
/// `InvalidConfig`, the same way the real factory rejects an unusable
/// config.
#[derive(Debug, Clone, Default)]
pub struct MockClientFactory {
    clients: Arc<RwLock<HashMap<String, MockDownloadClient>>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for the downloader with this id.
    pub fn insert(&self, downloader_id: &str, client: MockDownloadClient) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(downloader_id.to_string(), client);
    }

    pub fn get(&self, downloader_id: &str) -> Option<MockDownloadClient> {
        self.clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(downloader_id)
            .cloned()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(
        &self,
        config: &DownloaderConfig,
    ) -> Result<Arc<dyn DownloadClient>, DownloaderError> {
        match self.get(&config.id) {
            Some(client) => Ok(Arc::new(client)),
            None => Err(DownloaderError::InvalidConfig(format!(
                "no client registered for downloader {}",
                config.id
            ))),
        }
    }
}
