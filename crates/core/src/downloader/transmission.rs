//! Transmission RPC client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadDetails,
    DownloadFile, DownloadState, DownloadStatus, DownloadTracker, DownloaderConfig,
    DownloaderError, DownloaderType,
};

const DEFAULT_PATH: &str = "/transmission/rpc";
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

const STATUS_FIELDS: &[&str] = &[
    "id",
    "hashString",
    "name",
    "status",
    "percentDone",
    "totalSize",
    "sizeWhenDone",
    "leftUntilDone",
    "rateDownload",
    "rateUpload",
    "eta",
    "downloadDir",
    "error",
    "errorString",
    "peersSendingToUs",
    "peersGettingFromUs",
    "uploadRatio",
    "addedDate",
    "labels",
];

const DETAIL_FIELDS: &[&str] = &["files", "fileStats", "trackerStats", "doneDate", "comment"];

/// Transmission client for one configured downloader.
pub struct TransmissionClient {
    client: Client,
    config: DownloaderConfig,
    url: String,
    /// CSRF token handed out in the 409 response.
    session_id: RwLock<Option<String>>,
}

/// Raw RPC reply.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

impl TransmissionClient {
    pub fn new(config: DownloaderConfig, timeout: Duration) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloaderError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            url: config.endpoint(DEFAULT_PATH),
            client,
            config,
            session_id: RwLock::new(None),
        })
    }

    /// Send one RPC, repeating once with a fresh session id after a 409.
    async fn rpc(&self, method: &str, arguments: Value) -> Result<RpcResponse, DownloaderError> {
        let body = json!({ "method": method, "arguments": arguments });

        for _ in 0..2 {
            let mut request = self.client.post(&self.url).json(&body);
            if let Some(id) = self.session_id.read().await.as_deref() {
                request = request.header(SESSION_HEADER, id);
            }
            if self.config.has_credentials() {
                request = request.basic_auth(self.config.username(), Some(self.config.password()));
            }

            let response = request.send().await?;
            match response.status() {
                StatusCode::CONFLICT => {
                    let id = response
                        .headers()
                        .get(SESSION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    debug!(downloader = %self.config.id, "Refreshing Transmission session id");
                    *self.session_id.write().await = id;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(DownloaderError::AuthenticationFailed(
                        "Invalid credentials".to_string(),
                    ));
                }
                status if !status.is_success() => {
                    return Err(DownloaderError::ApiError(format!("HTTP {}", status)));
                }
                _ => return Ok(response.json::<RpcResponse>().await?),
            }
        }

        Err(DownloaderError::ApiError(
            "Transmission kept rejecting the session id".to_string(),
        ))
    }

    /// RPC whose non-`success` result is an error.
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, DownloaderError> {
        let response = self.rpc(method, arguments).await?;
        if response.result != "success" {
            return Err(DownloaderError::ApiError(response.result));
        }
        Ok(response.arguments)
    }

    async fn torrents(
        &self,
        ids: Option<&str>,
        fields: Vec<&str>,
    ) -> Result<Vec<TransmissionTorrent>, DownloaderError> {
        let mut arguments = json!({ "fields": fields });
        if let Some(id) = ids {
            arguments["ids"] = json!([id]);
        }
        let mut result = self.call("torrent-get", arguments).await?;
        serde_json::from_value(result["torrents"].take())
            .map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    async fn action(
        &self,
        method: &str,
        id: &str,
        extra: Value,
    ) -> Result<ActionResult, DownloaderError> {
        let mut arguments = json!({ "ids": [id] });
        if let (Some(target), Some(extra)) = (arguments.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        self.call(method, arguments).await?;
        Ok(ActionResult::ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransmissionTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    size_when_done: i64,
    #[serde(default)]
    left_until_done: i64,
    #[serde(default)]
    rate_download: i64,
    #[serde(default)]
    rate_upload: i64,
    #[serde(default)]
    eta: i64,
    #[serde(default)]
    download_dir: Option<String>,
    #[serde(default)]
    error: i64,
    #[serde(default)]
    error_string: String,
    #[serde(default)]
    peers_sending_to_us: i64,
    #[serde(default)]
    peers_getting_from_us: i64,
    #[serde(default)]
    upload_ratio: f64,
    #[serde(default)]
    added_date: i64,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    files: Vec<TransmissionFile>,
    #[serde(default)]
    file_stats: Vec<TransmissionFileStat>,
    #[serde(default)]
    tracker_stats: Vec<TransmissionTracker>,
    #[serde(default)]
    done_date: i64,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransmissionFile {
    name: String,
    length: i64,
    bytes_completed: i64,
}

#[derive(Debug, Deserialize)]
struct TransmissionFileStat {
    wanted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransmissionTracker {
    announce: String,
    #[serde(default)]
    tier: u32,
    #[serde(default)]
    last_announce_result: String,
}

impl TransmissionTorrent {
    fn state(&self) -> DownloadState {
        if self.error != 0 {
            return DownloadState::Error;
        }
        match self.status {
            0 if self.percent_done >= 1.0 => DownloadState::Completed,
            0 => DownloadState::Paused,
            5 | 6 => DownloadState::Seeding,
            _ => DownloadState::Downloading,
        }
    }

    fn into_status(self) -> (DownloadStatus, Self) {
        let size = if self.size_when_done > 0 {
            self.size_when_done
        } else {
            self.total_size
        }
        .max(0) as u64;
        let left = self.left_until_done.max(0) as u64;

        let mut status =
            DownloadStatus::new(self.hash_string.to_lowercase(), &self.name, self.state());
        status.progress = (self.percent_done * 100.0).clamp(0.0, 100.0);
        status.size = size;
        status.downloaded = size.saturating_sub(left);
        status.download_speed = self.rate_download.max(0) as u64;
        status.upload_speed = self.rate_upload.max(0) as u64;
        status.eta = (self.eta >= 0).then_some(self.eta as u64);
        status.save_path = self.download_dir.clone();
        status.category = self.labels.first().cloned();
        status.seeders = Some(self.peers_sending_to_us.max(0) as u32);
        status.leechers = Some(self.peers_getting_from_us.max(0) as u32);
        status.ratio = (self.upload_ratio >= 0.0).then_some(self.upload_ratio);
        status.added_at = timestamp(self.added_date);
        if self.error != 0 && !self.error_string.is_empty() {
            status.error_message = Some(self.error_string.clone());
        }
        (status, self)
    }

    fn into_details(self) -> DownloadDetails {
        let (status, torrent) = self.into_status();
        let hash = status.id.clone();
        let mut details = DownloadDetails::from_status(status);
        details.hash = Some(hash);
        details.files = torrent
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| DownloadFile {
                name: f.name.clone(),
                size: f.length.max(0) as u64,
                progress: percent(f.bytes_completed, f.length),
                wanted: torrent.file_stats.get(i).map(|s| s.wanted).unwrap_or(true),
            })
            .collect();
        details.trackers = torrent
            .tracker_stats
            .into_iter()
            .map(|t| DownloadTracker {
                url: t.announce,
                tier: Some(t.tier),
                status: None,
                message: (!t.last_announce_result.is_empty()).then_some(t.last_announce_result),
            })
            .collect();
        details.completed_at = timestamp(torrent.done_date);
        details.comment = (!torrent.comment.is_empty()).then_some(torrent.comment);
        details
    }
}

fn percent(done: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (done.max(0) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

#[async_trait]
impl DownloadClient for TransmissionClient {
    fn client_type(&self) -> DownloaderType {
        DownloaderType::Transmission
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        let mut arguments = json!({
            "filename": request.url,
            "paused": self.config.add_stopped,
        });
        if let Some(dir) = request
            .download_path
            .as_ref()
            .or(self.config.download_path.as_ref())
        {
            arguments["download-dir"] = json!(dir);
        }
        if let Some(label) = request
            .category
            .as_ref()
            .or(self.config.label.as_ref())
            .or(self.config.category.as_ref())
        {
            arguments["labels"] = json!([label]);
        }

        let response = self.rpc("torrent-add", arguments).await?;
        if response.result != "success" {
            return Ok(AddDownloadResult::rejected(response.result));
        }

        let added = response
            .arguments
            .get("torrent-added")
            .or_else(|| response.arguments.get("torrent-duplicate"));
        match added.and_then(|t| t["hashString"].as_str()) {
            Some(hash) => Ok(AddDownloadResult::accepted(hash.to_lowercase())),
            None => Ok(AddDownloadResult::rejected(
                "Transmission did not report the added torrent",
            )),
        }
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let torrents = self.torrents(None, STATUS_FIELDS.to_vec()).await?;
        Ok(torrents.into_iter().map(|t| t.into_status().0).collect())
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadStatus>, DownloaderError> {
        let torrents = self.torrents(Some(id), STATUS_FIELDS.to_vec()).await?;
        Ok(torrents.into_iter().next().map(|t| t.into_status().0))
    }

    async fn get_details(&self, id: &str) -> Result<Option<DownloadDetails>, DownloaderError> {
        let fields: Vec<&str> = STATUS_FIELDS.iter().chain(DETAIL_FIELDS).copied().collect();
        let torrents = self.torrents(Some(id), fields).await?;
        Ok(torrents.into_iter().next().map(TransmissionTorrent::into_details))
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.action("torrent-stop", id, Value::Null).await
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.action("torrent-start", id, Value::Null).await
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        self.action("torrent-remove", id, json!({ "delete-local-data": delete_files }))
            .await
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        let path = match &self.config.download_path {
            Some(path) => path.clone(),
            None => {
                let session = self.call("session-get", json!({})).await?;
                session["download-dir"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DownloaderError::ParseError("session-get without download-dir".to_string())
                    })?
            }
        };
        let result = self.call("free-space", json!({ "path": path })).await?;
        result["size-bytes"]
            .as_i64()
            .map(|b| b.max(0) as u64)
            .ok_or_else(|| DownloaderError::ParseError("free-space without size-bytes".to_string()))
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        let session = self.call("session-get", json!({})).await?;
        Ok(session["version"].as_str().unwrap_or_default().to_string())
    }
}
