//! Mock download client for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::downloader::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadState,
    DownloadStatus, DownloaderError, DownloaderType,
};
use crate::searcher::btih_from_magnet;

/// Mock implementation of the DownloadClient trait.
///
/// Clones share state, so a test can keep a handle for assertions after
/// handing a clone to a [`MockClientFactory`](super::MockClientFactory).
///
/// Provides controllable behavior for testing:
/// - Record accepted add requests
/// - Reject adds with a backend message, or fail every call with an error
/// - Delay every call to exercise timeouts
///
/// # Example
///
/// ```rust,ignore
/// let client = MockDownloadClient::new(DownloaderType::Transmission);
/// client.reject_adds("Fails.").await;
///
/// let result = client.add_download(&request).await?;
/// assert!(!result.success);
/// ```
#[derive(Debug, Clone)]
pub struct MockDownloadClient {
    client_type: DownloaderType,
    /// Requests the mock accepted.
    added: Arc<RwLock<Vec<AddDownloadRequest>>>,
    downloads: Arc<RwLock<Vec<DownloadStatus>>>,
    /// If set, adds are rejected with this message.
    rejection: Arc<RwLock<Option<String>>>,
    /// If set, every operation fails with this error.
    error: Arc<RwLock<Option<DownloaderError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    /// Accept adds without reporting a native id.
    withhold_ids: Arc<RwLock<bool>>,
    free_space: Arc<RwLock<u64>>,
    id_counter: Arc<RwLock<u32>>,
}

impl MockDownloadClient {
    /// Create a healthy mock that accepts everything.
    pub fn new(client_type: DownloaderType) -> Self {
        Self {
            client_type,
            added: Arc::new(RwLock::new(Vec::new())),
            downloads: Arc::new(RwLock::new(Vec::new())),
            rejection: Arc::new(RwLock::new(None)),
            error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(None)),
            withhold_ids: Arc::new(RwLock::new(false)),
            free_space: Arc::new(RwLock::new(100 * 1024 * 1024 * 1024)),
            id_counter: Arc::new(RwLock::new(0)),
        }
    }

    /// Requests accepted so far.
    pub async fn added(&self) -> Vec<AddDownloadRequest> {
        self.added.read().await.clone()
    }

    /// Reject subsequent adds the way a backend does (`success: false`).
    pub async fn reject_adds(&self, message: &str) {
        *self.rejection.write().await = Some(message.to_string());
    }

    /// Fail every subsequent operation with `error`.
    pub async fn fail_with(&self, error: DownloaderError) {
        *self.error.write().await = Some(error);
    }

    /// Back to healthy.
    pub async fn recover(&self) {
        *self.error.write().await = None;
        *self.rejection.write().await = None;
    }

    /// Sleep this long before answering any call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Accept subsequent adds but leave `id` empty, like a backend that
    /// queues the job before assigning it an id.
    pub async fn withhold_ids(&self) {
        *self.withhold_ids.write().await = true;
    }

    pub async fn set_free_space(&self, bytes: u64) {
        *self.free_space.write().await = bytes;
    }

    /// Seed a download as if it had been added earlier.
    pub async fn push_download(&self, status: DownloadStatus) {
        self.downloads.write().await.push(status);
    }

    pub async fn state_of(&self, id: &str) -> Option<DownloadState> {
        self.downloads
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.status)
    }

    async fn enter(&self) -> Result<(), DownloaderError> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.error.read().await.as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn next_id(&self, url: &str) -> String {
        if let Some(hash) = btih_from_magnet(url) {
            return hash;
        }
        let mut counter = self.id_counter.write().await;
        *counter += 1;
        format!("mock-{}", *counter)
    }

    async fn set_state(
        &self,
        id: &str,
        state: DownloadState,
    ) -> Result<ActionResult, DownloaderError> {
        let mut downloads = self.downloads.write().await;
        match downloads.iter_mut().find(|d| d.id == id) {
            Some(download) => {
                download.status = state;
                Ok(ActionResult::ok())
            }
            None => Err(DownloaderError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl DownloadClient for MockDownloadClient {
    fn client_type(&self) -> DownloaderType {
        self.client_type
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        self.enter().await?;

        if let Some(message) = self.rejection.read().await.clone() {
            return Ok(AddDownloadResult::rejected(message));
        }

        let id = self.next_id(&request.url).await;
        let mut status = DownloadStatus::new(&id, &request.title, DownloadState::Downloading);
        status.category = request.category.clone();
        status.save_path = request.download_path.clone();

        self.downloads.write().await.push(status);
        self.added.write().await.push(request.clone());

        if *self.withhold_ids.read().await {
            return Ok(AddDownloadResult {
                success: true,
                id: None,
                message: None,
            });
        }
        Ok(AddDownloadResult::accepted(id))
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        self.enter().await?;
        Ok(self.downloads.read().await.clone())
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.enter().await?;
        self.set_state(id, DownloadState::Paused).await
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.enter().await?;
        self.set_state(id, DownloadState::Downloading).await
    }

    async fn remove(&self, id: &str, _delete_files: bool) -> Result<ActionResult, DownloaderError> {
        self.enter().await?;
        let mut downloads = self.downloads.write().await;
        let before = downloads.len();
        downloads.retain(|d| d.id != id);
        if downloads.len() == before {
            return Err(DownloaderError::NotFound(id.to_string()));
        }
        Ok(ActionResult::ok())
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        self.enter().await?;
        Ok(*self.free_space.read().await)
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        self.enter().await?;
        Ok("mock".to_string())
    }
}
