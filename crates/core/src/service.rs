//! Acquisition facade.
//!
//! Ties the config store to the search aggregator and the download
//! dispatcher so callers can work with ids instead of configs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::TimeoutConfig;
use crate::downloader::{
    ActionResult, AddDownloadRequest, AggregatedDownloads, ConnectionTest, DispatchResult,
    DownloadDetails, DownloadDispatcher, DownloadStatus, DownloaderConfig, DownloaderError,
    FreeSpace,
};
use crate::searcher::{
    AggregatedSearchResults, DownloadType, SearchAggregator, SearchError, SearchParams,
};
use crate::store::{ConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Downloader not found: {0}")]
    DownloaderNotFound(String),

    #[error(transparent)]
    Downloader(#[from] DownloaderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Target of a connection test: a stored downloader, or form data that was
/// never saved.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TestTarget {
    Inline(DownloaderConfig),
    Id { id: String },
}

/// Record linking a game to an accepted download. Built here, persisted by
/// the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDownloadLink {
    pub game_id: String,
    pub downloader_id: String,
    /// Backend-native id returned by the downloader.
    pub download_hash: String,
    pub download_title: String,
    pub status: String,
    pub download_type: DownloadType,
}

impl GameDownloadLink {
    /// `None` unless `result` is an accepted dispatch.
    pub fn from_dispatch(
        game_id: &str,
        request: &AddDownloadRequest,
        result: &DispatchResult,
    ) -> Option<Self> {
        match result {
            DispatchResult::Accepted {
                id, downloader_id, ..
            } => Some(Self {
                game_id: game_id.to_string(),
                downloader_id: downloader_id.clone(),
                download_hash: id.clone(),
                download_title: request.title.clone(),
                status: "downloading".to_string(),
                download_type: request.download_type,
            }),
            _ => None,
        }
    }
}

pub struct AcquisitionService {
    store: Arc<dyn ConfigStore>,
    aggregator: SearchAggregator,
    dispatcher: DownloadDispatcher,
}

impl AcquisitionService {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        aggregator: SearchAggregator,
        dispatcher: DownloadDispatcher,
    ) -> Self {
        Self {
            store,
            aggregator,
            dispatcher,
        }
    }

    /// Service backed by the real indexer and downloader clients.
    pub fn native(
        store: Arc<dyn ConfigStore>,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, SearchError> {
        Ok(Self::new(
            store,
            SearchAggregator::with_native_clients(timeouts.indexer())?,
            DownloadDispatcher::native(timeouts.downloader()),
        ))
    }

    /// Search every enabled indexer. `limit` defaults to 50 and `offset`
    /// to 0.
    pub async fn search(
        &self,
        query: &str,
        categories: Vec<String>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> AggregatedSearchResults {
        let mut params = SearchParams::new(query).with_categories(categories);
        if let Some(limit) = limit {
            params = params.with_limit(limit);
        }
        if let Some(offset) = offset {
            params = params.with_offset(offset);
        }
        self.aggregator
            .search_all_indexers(self.store.as_ref(), &params)
            .await
    }

    /// Add a download to the first enabled downloader that accepts it.
    pub async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<DispatchResult, ServiceError> {
        let downloaders = self.store.get_enabled_downloaders().await?;
        Ok(self
            .dispatcher
            .add_with_fallback(&downloaders, request)
            .await?)
    }

    /// Downloads across every enabled downloader.
    pub async fn list_all_downloads(&self) -> Result<AggregatedDownloads, ServiceError> {
        let downloaders = self.store.get_enabled_downloaders().await?;
        Ok(self.dispatcher.list_all(&downloaders).await)
    }

    pub async fn list_downloads(
        &self,
        downloader_id: &str,
    ) -> Result<Vec<DownloadStatus>, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.list_downloads(&config).await?)
    }

    pub async fn get_download(
        &self,
        downloader_id: &str,
        id: &str,
    ) -> Result<Option<DownloadStatus>, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.get_download(&config, id).await?)
    }

    pub async fn get_details(
        &self,
        downloader_id: &str,
        id: &str,
    ) -> Result<Option<DownloadDetails>, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.get_details(&config, id).await?)
    }

    pub async fn pause(&self, downloader_id: &str, id: &str) -> Result<ActionResult, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.pause(&config, id).await?)
    }

    pub async fn resume(
        &self,
        downloader_id: &str,
        id: &str,
    ) -> Result<ActionResult, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.resume(&config, id).await?)
    }

    pub async fn remove(
        &self,
        downloader_id: &str,
        id: &str,
        delete_files: bool,
    ) -> Result<ActionResult, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.remove(&config, id, delete_files).await?)
    }

    pub async fn free_space(&self, downloader_id: &str) -> Result<FreeSpace, ServiceError> {
        let config = self.downloader(downloader_id).await?;
        Ok(self.dispatcher.free_space(&config).await)
    }

    pub async fn test_downloader(
        &self,
        target: TestTarget,
    ) -> Result<ConnectionTest, ServiceError> {
        let config = match target {
            TestTarget::Inline(config) => config,
            TestTarget::Id { id } => self.downloader(&id).await?,
        };
        debug!(
            downloader = %config.id,
            client_type = config.client_type.as_str(),
            "Testing downloader"
        );
        Ok(self.dispatcher.test_connection(&config).await)
    }

    async fn downloader(&self, id: &str) -> Result<DownloaderConfig, ServiceError> {
        self.store
            .get_downloader(id)
            .await?
            .ok_or_else(|| ServiceError::DownloaderNotFound(id.to_string()))
    }
}
