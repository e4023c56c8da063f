//! NZBGet JSON-RPC client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadState,
    DownloadStatus, DownloaderConfig, DownloaderError, DownloaderType,
};

const DEFAULT_PATH: &str = "/jsonrpc";

/// NZBGet client for one configured downloader.
pub struct NzbgetClient {
    client: Client,
    config: DownloaderConfig,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
}

impl NzbgetClient {
    pub fn new(config: DownloaderConfig, timeout: Duration) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloaderError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            url: config.endpoint(DEFAULT_PATH),
            client,
            config,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, DownloaderError> {
        let mut request = self.client.post(&self.url).json(&json!({
            "version": "1.1",
            "id": 1,
            "method": method,
            "params": params,
        }));
        if self.config.has_credentials() {
            request = request.basic_auth(self.config.username(), Some(self.config.password()));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DownloaderError::AuthenticationFailed(
                    "Invalid credentials".to_string(),
                ))
            }
            status if !status.is_success() => {
                return Err(DownloaderError::ApiError(format!("HTTP {}", status)))
            }
            _ => {}
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(DownloaderError::ApiError(error.message));
        }
        Ok(body.result)
    }

    async fn groups(&self) -> Result<Vec<NzbgetGroup>, DownloaderError> {
        let result = self.call("listgroups", json!([0])).await?;
        serde_json::from_value(result).map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    async fn history(&self) -> Result<Vec<NzbgetHistory>, DownloaderError> {
        let result = self.call("history", json!([false])).await?;
        serde_json::from_value(result).map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    async fn status(&self) -> Result<NzbgetStatus, DownloaderError> {
        let result = self.call("status", json!([])).await?;
        serde_json::from_value(result).map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    async fn edit_queue(&self, command: &str, id: i64) -> Result<ActionResult, DownloaderError> {
        let result = self.call("editqueue", json!([command, "", [id]])).await?;
        if result.as_bool() == Some(true) {
            Ok(ActionResult::ok())
        } else {
            Ok(ActionResult::failed(format!("NZBGet rejected {} for {}", command, id)))
        }
    }
}

/// Combine NZBGet's split 64-bit counters.
fn lo_hi(lo: i64, hi: i64) -> u64 {
    ((hi.max(0) as u64) << 32) | (lo as u64 & 0xFFFF_FFFF)
}

fn parse_id(id: &str) -> Result<i64, DownloaderError> {
    id.trim()
        .parse()
        .map_err(|_| DownloaderError::NotFound(format!("invalid NZBGet id: {}", id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NzbgetGroup {
    #[serde(rename = "NZBID")]
    nzb_id: i64,
    #[serde(rename = "NZBName")]
    nzb_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    file_size_lo: i64,
    #[serde(default)]
    file_size_hi: i64,
    #[serde(default)]
    remaining_size_lo: i64,
    #[serde(default)]
    remaining_size_hi: i64,
    #[serde(default)]
    paused_size_lo: i64,
    #[serde(default)]
    paused_size_hi: i64,
    #[serde(default)]
    category: String,
    #[serde(default)]
    dest_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NzbgetHistory {
    #[serde(rename = "NZBID")]
    nzb_id: i64,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    file_size_lo: i64,
    #[serde(default)]
    file_size_hi: i64,
    #[serde(default)]
    category: String,
    #[serde(default)]
    dest_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NzbgetStatus {
    /// Bytes per second.
    #[serde(default)]
    download_rate: i64,
    #[serde(default)]
    free_disk_space_lo: i64,
    #[serde(default)]
    free_disk_space_hi: i64,
    #[serde(default)]
    download_paused: bool,
}

fn group_state(status: &str, paused_everything: bool) -> DownloadState {
    match status {
        "PAUSED" => DownloadState::Paused,
        "LOADING_PARS" | "VERIFYING_SOURCES" | "REPAIRING" | "VERIFYING_REPAIRED" => {
            DownloadState::Repairing
        }
        "RENAMING" | "UNPACKING" | "MOVING" | "EXECUTING_SCRIPT" | "PP_QUEUED" => {
            DownloadState::Unpacking
        }
        "PP_FINISHED" => DownloadState::Completed,
        _ if paused_everything => DownloadState::Paused,
        _ => DownloadState::Downloading,
    }
}

/// History status is `KIND/DETAIL`, e.g. `SUCCESS/UNPACK` or `FAILURE/PAR`.
/// `WARNING` jobs finished, with issues the user may want to look at.
fn history_state(status: &str) -> DownloadState {
    match status.split('/').next().unwrap_or_default() {
        "FAILURE" | "DELETED" => DownloadState::Error,
        _ => DownloadState::Completed,
    }
}

/// NZBGet only reports the global rate; split it across the groups that
/// are actually downloading.
fn rate_share(groups: &[NzbgetGroup], rate: u64, paused_everything: bool) -> u64 {
    let active = groups
        .iter()
        .filter(|g| g.is_transferring(paused_everything))
        .count() as u64;
    if active == 0 {
        0
    } else {
        rate / active
    }
}

impl NzbgetGroup {
    fn is_transferring(&self, paused_everything: bool) -> bool {
        self.status == "DOWNLOADING"
            && group_state(&self.status, paused_everything) == DownloadState::Downloading
    }

    /// `rate` is this group's share of the global download rate.
    fn into_status(self, rate: u64, paused_everything: bool) -> DownloadStatus {
        let size = lo_hi(self.file_size_lo, self.file_size_hi);
        let remaining = lo_hi(self.remaining_size_lo, self.remaining_size_hi);
        let state = group_state(&self.status, paused_everything);
        let transferring = self.is_transferring(paused_everything);

        let mut status = DownloadStatus::new(self.nzb_id.to_string(), self.nzb_name, state);
        status.size = size;
        status.downloaded = size.saturating_sub(remaining);
        status.progress = if size > 0 {
            (status.downloaded as f64 / size as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        if transferring {
            status.download_speed = rate;
            if rate > 0 {
                let paused = lo_hi(self.paused_size_lo, self.paused_size_hi);
                let active = remaining.saturating_sub(paused);
                status.eta = Some(active / rate);
            }
        }
        status.category = (!self.category.is_empty()).then_some(self.category);
        status.save_path = (!self.dest_dir.is_empty()).then_some(self.dest_dir);
        status
    }
}

impl NzbgetHistory {
    fn into_status(self) -> DownloadStatus {
        let state = history_state(&self.status);
        let size = lo_hi(self.file_size_lo, self.file_size_hi);
        let mut status = DownloadStatus::new(self.nzb_id.to_string(), self.name, state);
        status.size = size;
        status.downloaded = size;
        status.progress = 100.0;
        status.category = (!self.category.is_empty()).then_some(self.category);
        status.save_path = (!self.dest_dir.is_empty()).then_some(self.dest_dir);
        if state == DownloadState::Error {
            status.error_message = Some(self.status);
        }
        status
    }
}

#[async_trait]
impl DownloadClient for NzbgetClient {
    fn client_type(&self) -> DownloaderType {
        DownloaderType::Nzbget
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        let category = request
            .category
            .as_ref()
            .or(self.config.category.as_ref())
            .cloned()
            .unwrap_or_default();
        let filename = if request.title.ends_with(".nzb") {
            request.title.clone()
        } else {
            format!("{}.nzb", request.title)
        };

        let params = json!([
            filename,
            request.url,
            category,
            request.priority.unwrap_or(0),
            false,
            self.config.add_stopped,
            "",
            0,
            "SCORE",
            []
        ]);
        let result = self.call("append", params).await?;
        match result.as_i64() {
            Some(id) if id > 0 => Ok(AddDownloadResult::accepted(id.to_string())),
            _ => Ok(AddDownloadResult::rejected("NZBGet refused the NZB")),
        }
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let status = self.status().await?;
        let groups = self.groups().await?;
        let rate = rate_share(
            &groups,
            status.download_rate.max(0) as u64,
            status.download_paused,
        );
        let mut downloads: Vec<DownloadStatus> = groups
            .into_iter()
            .map(|g| g.into_status(rate, status.download_paused))
            .collect();
        downloads.extend(self.history().await?.into_iter().map(NzbgetHistory::into_status));
        Ok(downloads)
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.edit_queue("GroupPause", parse_id(id)?).await
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.edit_queue("GroupResume", parse_id(id)?).await
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        let nzb_id = parse_id(id)?;
        let queued = self.groups().await?.iter().any(|g| g.nzb_id == nzb_id);
        let command = match (queued, delete_files) {
            (true, true) => "GroupFinalDelete",
            (true, false) => "GroupDelete",
            (false, true) => "HistoryFinalDelete",
            (false, false) => "HistoryDelete",
        };
        self.edit_queue(command, nzb_id).await
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        let status = self.status().await?;
        Ok(lo_hi(status.free_disk_space_lo, status.free_disk_space_hi))
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        let result = self.call("version", json!([])).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}
