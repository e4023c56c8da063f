//! SABnzbd API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadState,
    DownloadStatus, DownloaderConfig, DownloaderError, DownloaderType,
};

const DEFAULT_PATH: &str = "/api";
/// History entries included in a full listing. Single lookups query by id.
const HISTORY_LIMIT: &str = "100";

/// SABnzbd client for one configured downloader.
pub struct SabnzbdClient {
    client: Client,
    config: DownloaderConfig,
    url: String,
}

impl SabnzbdClient {
    pub fn new(config: DownloaderConfig, timeout: Duration) -> Result<Self, DownloaderError> {
        if config.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(DownloaderError::InvalidConfig(format!(
                "downloader {} (sabnzbd) requires api_key",
                config.id
            )));
        }
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

    /// Call `mode` with extra query parameters and return the JSON body.
    async fn api(&self, mode: &str, params: &[(&str, &str)]) -> Result<Value, DownloaderError> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .get(&self.url)
            .query(&[("mode", mode), ("output", "json"), ("apikey", api_key)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::ApiError(format!("HTTP {}", status)));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            if error.to_lowercase().contains("api key") {
                return Err(DownloaderError::AuthenticationFailed(error.to_string()));
            }
            return Err(DownloaderError::ApiError(error.to_string()));
        }
        Ok(body)
    }

    async fn queue(&self) -> Result<SabQueue, DownloaderError> {
        let mut body = self.api("queue", &[]).await?;
        serde_json::from_value(body["queue"].take())
            .map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    async fn history(&self, params: &[(&str, &str)]) -> Result<SabHistory, DownloaderError> {
        let mut body = self.api("history", params).await?;
        serde_json::from_value(body["history"].take())
            .map_err(|e| DownloaderError::ParseError(e.to_string()))
    }

    /// Whether `id` is still in the queue (as opposed to history).
    async fn in_queue(&self, id: &str) -> Result<bool, DownloaderError> {
        Ok(self.queue().await?.slots.iter().any(|s| s.nzo_id == id))
    }
}

#[derive(Debug, Deserialize)]
struct SabQueue {
    #[serde(default)]
    status: String,
    /// Current speed in KB/s.
    #[serde(default)]
    kbpersec: String,
    #[serde(default)]
    slots: Vec<SabQueueSlot>,
}

#[derive(Debug, Deserialize)]
struct SabQueueSlot {
    nzo_id: String,
    filename: String,
    #[serde(default)]
    status: String,
    /// Megabytes, as a decimal string.
    #[serde(default)]
    mb: String,
    #[serde(default)]
    mbleft: String,
    #[serde(default)]
    percentage: String,
    #[serde(default)]
    timeleft: String,
    #[serde(default)]
    cat: String,
}

#[derive(Debug, Deserialize)]
struct SabHistory {
    #[serde(default)]
    slots: Vec<SabHistorySlot>,
}

#[derive(Debug, Deserialize)]
struct SabHistorySlot {
    nzo_id: String,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    category: String,
    #[serde(default)]
    storage: String,
    #[serde(default)]
    fail_message: String,
}

fn mb_to_bytes(mb: &str) -> u64 {
    mb.trim()
        .parse::<f64>()
        .map(|v| (v.max(0.0) * 1024.0 * 1024.0) as u64)
        .unwrap_or(0)
}

fn kb_to_bytes(kb: &str) -> u64 {
    kb.trim()
        .parse::<f64>()
        .map(|v| (v.max(0.0) * 1024.0) as u64)
        .unwrap_or(0)
}

/// `H:MM:SS` (hours may exceed 24) to seconds.
fn parse_timeleft(s: &str) -> Option<u64> {
    let mut total = 0u64;
    for part in s.trim().split(':') {
        total = total * 60 + part.parse::<u64>().ok()?;
    }
    (total > 0).then_some(total)
}

fn queue_state(status: &str) -> DownloadState {
    match status {
        "Paused" => DownloadState::Paused,
        "Repairing" | "Verifying" | "QuickCheck" => DownloadState::Repairing,
        "Extracting" | "Moving" | "Running" => DownloadState::Unpacking,
        _ => DownloadState::Downloading,
    }
}

fn history_state(status: &str) -> DownloadState {
    match status {
        "Completed" => DownloadState::Completed,
        "Failed" => DownloadState::Error,
        "Repairing" | "Verifying" | "QuickCheck" => DownloadState::Repairing,
        "Extracting" | "Moving" | "Running" => DownloadState::Unpacking,
        _ => DownloadState::Downloading,
    }
}

impl SabQueueSlot {
    fn into_status(self, queue_paused: bool, speed: u64, first: bool) -> DownloadStatus {
        let mut state = queue_state(&self.status);
        if queue_paused && state == DownloadState::Downloading {
            state = DownloadState::Paused;
        }
        let size = mb_to_bytes(&self.mb);
        let left = mb_to_bytes(&self.mbleft);

        let mut status = DownloadStatus::new(self.nzo_id, self.filename, state);
        status.size = size;
        status.downloaded = size.saturating_sub(left);
        status.progress = self.percentage.trim().parse::<f64>().unwrap_or(0.0).clamp(0.0, 100.0);
        // SABnzbd reports one global speed; it belongs to the active slot.
        status.download_speed = if first && state == DownloadState::Downloading {
            speed
        } else {
            0
        };
        status.eta = parse_timeleft(&self.timeleft);
        status.category = (!self.cat.is_empty() && self.cat != "*").then_some(self.cat);
        status
    }
}

impl SabHistorySlot {
    fn into_status(self) -> DownloadStatus {
        let state = history_state(&self.status);
        let mut status = DownloadStatus::new(self.nzo_id, self.name, state);
        status.size = self.bytes;
        status.downloaded = self.bytes;
        status.progress = 100.0;
        status.category =
            (!self.category.is_empty() && self.category != "*").then_some(self.category);
        status.save_path = (!self.storage.is_empty()).then_some(self.storage);
        if state == DownloadState::Error && !self.fail_message.is_empty() {
            status.error_message = Some(self.fail_message);
        }
        status
    }
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn client_type(&self) -> DownloaderType {
        DownloaderType::Sabnzbd
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        let mut params: Vec<(&str, &str)> = vec![
            ("name", request.url.as_str()),
            ("nzbname", request.title.as_str()),
        ];
        if let Some(category) = request.category.as_ref().or(self.config.category.as_ref()) {
            params.push(("cat", category.as_str()));
        }
        if self.config.add_stopped {
            // -2 is SABnzbd's "Paused" priority.
            params.push(("priority", "-2"));
        }

        let body = self.api("addurl", &params).await?;
        if body.get("status").and_then(Value::as_bool) != Some(true) {
            return Ok(AddDownloadResult::rejected("SABnzbd refused the NZB"));
        }
        match body["nzo_ids"].as_array().and_then(|ids| ids.first()).and_then(Value::as_str) {
            Some(id) => Ok(AddDownloadResult::accepted(id)),
            None => Ok(AddDownloadResult::rejected("SABnzbd did not return an nzo id")),
        }
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let queue = self.queue().await?;
        let history = self.history(&[("limit", HISTORY_LIMIT)]).await?;

        let paused = queue.status == "Paused";
        let speed = kb_to_bytes(&queue.kbpersec);
        let mut downloads: Vec<DownloadStatus> = queue
            .slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.into_status(paused, speed, i == 0))
            .collect();
        downloads.extend(history.slots.into_iter().map(SabHistorySlot::into_status));
        Ok(downloads)
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadStatus>, DownloaderError> {
        let queue = self.queue().await?;
        let paused = queue.status == "Paused";
        let speed = kb_to_bytes(&queue.kbpersec);
        if let Some((i, slot)) = queue
            .slots
            .into_iter()
            .enumerate()
            .find(|(_, slot)| slot.nzo_id == id)
        {
            return Ok(Some(slot.into_status(paused, speed, i == 0)));
        }

        let history = self.history(&[("nzo_ids", id)]).await?;
        Ok(history
            .slots
            .into_iter()
            .find(|slot| slot.nzo_id == id)
            .map(SabHistorySlot::into_status))
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.api("queue", &[("name", "pause"), ("value", id)]).await?;
        Ok(ActionResult::ok())
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.api("queue", &[("name", "resume"), ("value", id)]).await?;
        Ok(ActionResult::ok())
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        let mode = if self.in_queue(id).await? { "queue" } else { "history" };
        let del_files = if delete_files { "1" } else { "0" };
        let body = self
            .api(mode, &[("name", "delete"), ("value", id), ("del_files", del_files)])
            .await?;
        if body.get("status").and_then(Value::as_bool) == Some(false) {
            return Ok(ActionResult::failed(format!("SABnzbd could not delete {}", id)));
        }
        Ok(ActionResult::ok())
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        let queue = self.api("queue", &[]).await?;
        // diskspace1 is the incomplete folder, in GB.
        let gb = &queue["queue"]["diskspace1"];
        let gb = gb
            .as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .or_else(|| gb.as_f64())
            .ok_or_else(|| DownloaderError::ParseError("queue without diskspace1".to_string()))?;
        Ok((gb.max(0.0) * 1024.0 * 1024.0 * 1024.0) as u64)
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        let body = self.api("version", &[]).await?;
        let version = body["version"].as_str().unwrap_or_default().to_string();
        // mode=version does not check the key; the queue call does.
        self.api("queue", &[("limit", "1")]).await?;
        Ok(version)
    }
}
