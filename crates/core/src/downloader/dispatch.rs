//! Priority-ordered fallback across configured downloaders, plus the
//! per-downloader pass-through operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use super::client::{ClientFactory, NativeClientFactory};
use super::{
    ActionResult, AddDownloadRequest, ConnectionTest, DownloadClient, DownloadDetails,
    DownloadStatus, DownloaderConfig, DownloaderError,
};
use crate::metrics;
use crate::searcher::labelled_error;

/// Message returned when every downloader in the chain failed.
pub const ALL_DOWNLOADERS_FAILED: &str = "all downloaders failed";

/// Message returned when there is nothing to dispatch to.
pub const NO_DOWNLOADERS_CONFIGURED: &str = "No downloaders configured";

/// One failed step of a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAttempt {
    pub downloader_id: String,
    pub downloader_name: String,
    pub error: String,
}

/// Outcome of an add-download fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// A downloader accepted the payload.
    Accepted {
        /// Backend-native id of the new download.
        id: String,
        downloader_id: String,
        downloader_name: String,
    },
    /// Every downloader was tried and none accepted.
    Failed { attempts: Vec<DispatchAttempt> },
    /// No enabled downloaders.
    Unconfigured,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Accepted { .. })
    }

    pub fn attempts(&self) -> &[DispatchAttempt] {
        match self {
            DispatchResult::Failed { attempts } => attempts.as_slice(),
            _ => &[],
        }
    }
}

impl Serialize for DispatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DispatchResult::Accepted {
                id,
                downloader_id,
                downloader_name,
            } => {
                let mut s = serializer.serialize_struct("DispatchResult", 4)?;
                s.serialize_field("success", &true)?;
                s.serialize_field("id", id)?;
                s.serialize_field("downloaderId", downloader_id)?;
                s.serialize_field("downloaderName", downloader_name)?;
                s.end()
            }
            DispatchResult::Failed { attempts } => {
                let mut s = serializer.serialize_struct("DispatchResult", 3)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("message", ALL_DOWNLOADERS_FAILED)?;
                s.serialize_field("attempts", attempts)?;
                s.end()
            }
            DispatchResult::Unconfigured => {
                let mut s = serializer.serialize_struct("DispatchResult", 3)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("message", NO_DOWNLOADERS_CONFIGURED)?;
                s.serialize_field("attempts", &Vec::<DispatchAttempt>::new())?;
                s.end()
            }
        }
    }
}

/// Best-effort free space report. A failed probe reports 0 bytes plus the
/// reason instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpace {
    pub free_space: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A download tagged with the downloader that reported it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedDownload {
    pub downloader_id: String,
    pub downloader_name: String,
    #[serde(flatten)]
    pub status: DownloadStatus,
}

/// Downloads from every enabled downloader, merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedDownloads {
    pub downloads: Vec<TaggedDownload>,
    /// One `"<downloader-name>: <reason>"` entry per downloader that failed.
    pub errors: Vec<String>,
}

/// Dispatches operations to downloader adapters.
///
/// Holds no connection state: every call builds its adapter from the
/// config it is handed, so configs can change between calls.
#[derive(Clone)]
pub struct DownloadDispatcher {
    factory: Arc<dyn ClientFactory>,
    timeout: Duration,
}

impl DownloadDispatcher {
    /// `timeout` bounds every individual downloader call.
    pub fn new(factory: Arc<dyn ClientFactory>, timeout: Duration) -> Self {
        Self { factory, timeout }
    }

    /// Dispatcher over the real HTTP adapters.
    pub fn native(timeout: Duration) -> Self {
        Self::new(Arc::new(NativeClientFactory::new(timeout)), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Try `downloaders` in order until one accepts `request`.
    ///
    /// The caller passes them already sorted by ascending priority. A
    /// rejection, transport error or timeout moves on to the next one. A
    /// config that cannot produce an adapter at all is returned as `Err`
    /// without trying the rest.
    pub async fn add_with_fallback(
        &self,
        downloaders: &[DownloaderConfig],
        request: &AddDownloadRequest,
    ) -> Result<DispatchResult, DownloaderError> {
        if downloaders.is_empty() {
            info!(title = %request.title, "No downloaders configured, nothing to dispatch");
            metrics::DISPATCH_OUTCOMES
                .with_label_values(&["unconfigured"])
                .inc();
            return Ok(DispatchResult::Unconfigured);
        }

        let mut attempts = Vec::new();

        for config in downloaders {
            let client = self.factory.create(config)?;

            debug!(
                downloader = %config.id,
                client_type = config.client_type.as_str(),
                title = %request.title,
                "Dispatching download"
            );

            let error = match self.timed(client.add_download(request)).await {
                Ok(result) if result.success => {
                    let id = match result.id.filter(|id| !id.is_empty()) {
                        Some(id) => id,
                        None => {
                            warn!(
                                downloader = %config.id,
                                title = %request.title,
                                "Download accepted without a native id"
                            );
                            String::new()
                        }
                    };
                    info!(
                        downloader = %config.id,
                        download_id = %id,
                        attempts = attempts.len() + 1,
                        "Download accepted"
                    );
                    metrics::DISPATCH_OUTCOMES
                        .with_label_values(&["accepted"])
                        .inc();
                    return Ok(DispatchResult::Accepted {
                        id,
                        downloader_id: config.id.clone(),
                        downloader_name: config.name.clone(),
                    });
                }
                Ok(result) => result
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "download rejected".to_string()),
                Err(e) => e.to_string(),
            };

            warn!(downloader = %config.id, error = %error, "Downloader failed, trying next");
            metrics::DOWNLOADER_ATTEMPT_FAILURES
                .with_label_values(&[config.client_type.as_str()])
                .inc();
            attempts.push(DispatchAttempt {
                downloader_id: config.id.clone(),
                downloader_name: config.name.clone(),
                error,
            });
        }

        warn!(title = %request.title, attempts = attempts.len(), "All downloaders failed");
        metrics::DISPATCH_OUTCOMES.with_label_values(&["failed"]).inc();
        Ok(DispatchResult::Failed { attempts })
    }

    pub async fn list_downloads(
        &self,
        config: &DownloaderConfig,
    ) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.list_downloads()).await
    }

    pub async fn get_download(
        &self,
        config: &DownloaderConfig,
        id: &str,
    ) -> Result<Option<DownloadStatus>, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.get_download(id)).await
    }

    pub async fn get_details(
        &self,
        config: &DownloaderConfig,
        id: &str,
    ) -> Result<Option<DownloadDetails>, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.get_details(id)).await
    }

    pub async fn pause(
        &self,
        config: &DownloaderConfig,
        id: &str,
    ) -> Result<ActionResult, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.pause(id)).await
    }

    pub async fn resume(
        &self,
        config: &DownloaderConfig,
        id: &str,
    ) -> Result<ActionResult, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.resume(id)).await
    }

    pub async fn remove(
        &self,
        config: &DownloaderConfig,
        id: &str,
        delete_files: bool,
    ) -> Result<ActionResult, DownloaderError> {
        let client = self.factory.create(config)?;
        self.timed(client.remove(id, delete_files)).await
    }

    /// Free space on the downloader's volume. Never fails.
    pub async fn free_space(&self, config: &DownloaderConfig) -> FreeSpace {
        let result = match self.factory.create(config) {
            Ok(client) => self.timed(client.free_space()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => FreeSpace {
                free_space: bytes,
                error: None,
            },
            Err(e) => {
                debug!(downloader = %config.id, error = %e, "Free space unavailable");
                FreeSpace {
                    free_space: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Reachability and auth probe. Works on configs that were never
    /// stored; an unusable config is reported as a failed test.
    pub async fn test_connection(&self, config: &DownloaderConfig) -> ConnectionTest {
        let client = match self.factory.create(config) {
            Ok(client) => client,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: e.to_string(),
                }
            }
        };

        match tokio::time::timeout(self.timeout, client.test_connection()).await {
            Ok(result) => result,
            Err(_) => ConnectionTest {
                success: false,
                message: DownloaderError::Timeout.to_string(),
            },
        }
    }

    /// List downloads on every downloader concurrently.
    ///
    /// An unreachable downloader contributes an error entry instead of
    /// failing the whole listing.
    pub async fn list_all(&self, downloaders: &[DownloaderConfig]) -> AggregatedDownloads {
        let results = join_all(
            downloaders
                .iter()
                .map(|config| async move { (config, self.list_downloads(config).await) }),
        )
        .await;

        let mut aggregated = AggregatedDownloads::default();
        for (config, result) in results {
            match result {
                Ok(statuses) => {
                    aggregated
                        .downloads
                        .extend(statuses.into_iter().map(|status| TaggedDownload {
                            downloader_id: config.id.clone(),
                            downloader_name: config.name.clone(),
                            status,
                        }));
                }
                Err(e) => {
                    warn!(downloader = %config.id, error = %e, "Failed to list downloads");
                    aggregated
                        .errors
                        .push(labelled_error(&config.name, &e.to_string()));
                }
            }
        }

        aggregated
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, DownloaderError>>,
    ) -> Result<T, DownloaderError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DownloaderError::Timeout),
        }
    }
}
