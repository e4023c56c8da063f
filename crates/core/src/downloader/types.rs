//! Types for download client operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::searcher::DownloadType;

/// Errors that can occur during download client operations.
#[derive(Debug, Clone, Error)]
pub enum DownloaderError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Download not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by {client}: {operation}")]
    NotSupported {
        client: &'static str,
        operation: &'static str,
    },

    #[error("Invalid downloader configuration: {0}")]
    InvalidConfig(String),

    #[error("Request timeout")]
    Timeout,
}

impl From<reqwest::Error> for DownloaderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownloaderError::Timeout
        } else if e.is_connect() {
            DownloaderError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            DownloaderError::ParseError(e.to_string())
        } else {
            DownloaderError::ApiError(e.to_string())
        }
    }
}

/// Closed set of supported download clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderType {
    Transmission,
    Rtorrent,
    Qbittorrent,
    Sabnzbd,
    Nzbget,
}

impl DownloaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloaderType::Transmission => "transmission",
            DownloaderType::Rtorrent => "rtorrent",
            DownloaderType::Qbittorrent => "qbittorrent",
            DownloaderType::Sabnzbd => "sabnzbd",
            DownloaderType::Nzbget => "nzbget",
        }
    }

    /// Which kind of payload this client accepts.
    pub fn family(&self) -> DownloadType {
        match self {
            DownloaderType::Transmission
            | DownloaderType::Rtorrent
            | DownloaderType::Qbittorrent => DownloadType::Torrent,
            DownloaderType::Sabnzbd | DownloaderType::Nzbget => DownloadType::Usenet,
        }
    }
}

/// A configured download backend.
///
/// The same shape is used for stored records and for unsaved form data
/// passed to a connection test. Form data may use camelCase keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloaderConfig {
    pub id: String,
    pub name: String,
    /// Selects the adapter for every operation on this record.
    #[serde(rename = "type")]
    pub client_type: DownloaderType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ascending; lower is tried first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Hostname, or a full base URL including scheme.
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "useSsl")]
    pub use_ssl: bool,
    /// Overrides the client's default API path.
    #[serde(default, alias = "urlPath")]
    pub url_path: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default, alias = "downloadPath")]
    pub download_path: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Add downloads in the paused state.
    #[serde(default, alias = "addStopped")]
    pub add_stopped: bool,
    #[serde(default, alias = "removeCompleted")]
    pub remove_completed: bool,
    #[serde(default, alias = "postImportCategory")]
    pub post_import_category: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    1
}

impl DownloaderConfig {
    /// `scheme://host[:port]` without a trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let base = if host.contains("://") {
            host.to_string()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, host)
        };
        match self.port {
            Some(port) if !has_explicit_port(&base) => format!("{}:{}", base, port),
            _ => base,
        }
    }

    /// Base URL joined with `url_path`, or with `default_path` when unset.
    pub fn endpoint(&self, default_path: &str) -> String {
        let path = self
            .url_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(default_path);
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            self.base_url()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn has_credentials(&self) -> bool {
        !self.username().is_empty() || !self.password().is_empty()
    }
}

fn has_explicit_port(base: &str) -> bool {
    let authority = base.split("://").nth(1).unwrap_or(base);
    let authority = authority.split('/').next().unwrap_or(authority);
    // IPv6 literals carry colons inside brackets.
    match authority.rfind(']') {
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    }
}

/// Payload submitted for acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadRequest {
    /// `.torrent` URL, magnet URI or NZB URL.
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Omitted by callers that only deal in torrents.
    #[serde(default)]
    pub download_type: DownloadType,
}

impl AddDownloadRequest {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        download_type: DownloadType,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            category: None,
            download_path: None,
            priority: None,
            download_type,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_download_path(mut self, path: impl Into<String>) -> Self {
        self.download_path = Some(path.into());
        self
    }
}

/// Backend verdict on an add request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadResult {
    pub success: bool,
    /// Backend-native id (info hash, NZO id, NZBGet id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AddDownloadResult {
    pub fn accepted(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            message: Some(message.into()),
        }
    }
}

/// Normalized download state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Downloading,
    Seeding,
    Completed,
    Paused,
    Error,
    Repairing,
    Unpacking,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Downloading => "downloading",
            DownloadState::Seeding => "seeding",
            DownloadState::Completed => "completed",
            DownloadState::Paused => "paused",
            DownloadState::Error => "error",
            DownloadState::Repairing => "repairing",
            DownloadState::Unpacking => "unpacking",
        }
    }
}

/// Current state of one download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub id: String,
    pub name: String,
    pub status: DownloadState,
    /// 0-100.
    pub progress: f64,
    /// Total size in bytes.
    pub size: u64,
    pub downloaded: u64,
    /// Instantaneous, bytes/second.
    pub download_speed: u64,
    pub upload_speed: u64,
    /// Seconds remaining, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeders: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leechers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DownloadStatus {
    /// A status with zeroed counters, for adapters to fill in.
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: DownloadState) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            progress: 0.0,
            size: 0,
            downloaded: 0,
            download_speed: 0,
            upload_speed: 0,
            eta: None,
            category: None,
            save_path: None,
            seeders: None,
            leechers: None,
            ratio: None,
            added_at: None,
            error_message: None,
        }
    }
}

/// A file inside a download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFile {
    pub name: String,
    pub size: u64,
    /// 0-100.
    pub progress: f64,
    #[serde(default)]
    pub wanted: bool,
}

/// A tracker announcing a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTracker {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Extended information about one download. Torrent-only fields stay empty
/// for usenet backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDetails {
    #[serde(flatten)]
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub files: Vec<DownloadFile>,
    #[serde(default)]
    pub trackers: Vec<DownloadTracker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DownloadDetails {
    pub fn from_status(status: DownloadStatus) -> Self {
        Self {
            download_dir: status.save_path.clone(),
            status,
            hash: None,
            files: Vec::new(),
            trackers: Vec::new(),
            completed_at: None,
            comment: None,
        }
    }
}

/// Outcome of pause, resume or remove.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Outcome of a connection probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// Capability interface implemented once per client type.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn client_type(&self) -> DownloaderType;

    /// Submit a payload URL. Backend-reported rejection is `Ok` with
    /// `success: false`; transport and auth failures are `Err`.
    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError>;

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError>;

    async fn get_download(&self, id: &str) -> Result<Option<DownloadStatus>, DownloaderError> {
        Ok(self
            .list_downloads()
            .await?
            .into_iter()
            .find(|d| d.id.eq_ignore_ascii_case(id)))
    }

    async fn get_details(&self, id: &str) -> Result<Option<DownloadDetails>, DownloaderError> {
        Ok(self.get_download(id).await?.map(DownloadDetails::from_status))
    }

    /// Pausing an already paused download succeeds.
    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError>;

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError>;

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError>;

    /// Free bytes in the default download location.
    async fn free_space(&self) -> Result<u64, DownloaderError>;

    /// Lightweight authenticated request returning the backend version.
    async fn version(&self) -> Result<String, DownloaderError>;

    /// Reachability and auth probe. Never submits a download.
    async fn test_connection(&self) -> ConnectionTest {
        match self.version().await {
            Ok(version) => ConnectionTest {
                success: true,
                message: format!("Connected to {} {}", self.client_type().as_str(), version)
                    .trim_end()
                    .to_string(),
            },
            Err(e) => ConnectionTest {
                success: false,
                message: e.to_string(),
            },
        }
    }
}
