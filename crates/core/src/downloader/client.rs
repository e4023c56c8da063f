//! Tag dispatch from a downloader record to its adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::nzbget::NzbgetClient;
use super::qbittorrent::QBittorrentClient;
use super::rtorrent::RTorrentClient;
use super::sabnzbd::SabnzbdClient;
use super::transmission::TransmissionClient;
use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, ConnectionTest, DownloadClient,
    DownloadDetails, DownloadStatus, DownloaderConfig, DownloaderError, DownloaderType,
};

/// Unified download client (enum dispatch).
///
/// Every `DownloaderType` has exactly one variant; adding a client type is
/// a compile error here until it is handled.
pub enum DownloaderClient {
    Transmission(TransmissionClient),
    Rtorrent(RTorrentClient),
    Qbittorrent(QBittorrentClient),
    Sabnzbd(SabnzbdClient),
    Nzbget(NzbgetClient),
}

impl DownloaderClient {
    /// Create the adapter selected by `config.client_type`.
    pub fn from_config(
        config: &DownloaderConfig,
        timeout: Duration,
    ) -> Result<Self, DownloaderError> {
        let config = config.clone();
        Ok(match config.client_type {
            DownloaderType::Transmission => {
                Self::Transmission(TransmissionClient::new(config, timeout)?)
            }
            DownloaderType::Rtorrent => Self::Rtorrent(RTorrentClient::new(config, timeout)?),
            DownloaderType::Qbittorrent => {
                Self::Qbittorrent(QBittorrentClient::new(config, timeout)?)
            }
            DownloaderType::Sabnzbd => Self::Sabnzbd(SabnzbdClient::new(config, timeout)?),
            DownloaderType::Nzbget => Self::Nzbget(NzbgetClient::new(config, timeout)?),
        })
    }

    fn inner(&self) -> &dyn DownloadClient {
        match self {
            Self::Transmission(c) => c,
            Self::Rtorrent(c) => c,
            Self::Qbittorrent(c) => c,
            Self::Sabnzbd(c) => c,
            Self::Nzbget(c) => c,
        }
    }
}

#[async_trait]
impl DownloadClient for DownloaderClient {
    fn client_type(&self) -> DownloaderType {
        self.inner().client_type()
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        self.inner().add_download(request).await
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        self.inner().list_downloads().await
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadStatus>, DownloaderError> {
        self.inner().get_download(id).await
    }

    async fn get_details(&self, id: &str) -> Result<Option<DownloadDetails>, DownloaderError> {
        self.inner().get_details(id).await
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.inner().pause(id).await
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.inner().resume(id).await
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        self.inner().remove(id, delete_files).await
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        self.inner().free_space().await
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        self.inner().version().await
    }

    async fn test_connection(&self) -> ConnectionTest {
        self.inner().test_connection().await
    }
}

/// Builds the adapter for a downloader record.
///
/// The dispatcher only talks to this seam, so tests can hand it scripted
/// clients instead of real backends.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &DownloaderConfig) -> Result<Arc<dyn DownloadClient>, DownloaderError>;
}

/// Factory producing the real HTTP adapters.
#[derive(Debug, Clone)]
pub struct NativeClientFactory {
    timeout: Duration,
}

impl NativeClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for NativeClientFactory {
    fn create(
        &self,
        config: &DownloaderConfig,
    ) -> Result<Arc<dyn DownloadClient>, DownloaderError> {
        Ok(Arc::new(DownloaderClient::from_config(config, self.timeout)?))
    }
}
