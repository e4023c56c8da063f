//! qBittorrent WebUI API v2 client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::payload::{PayloadResolver, TorrentPayload};
use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadDetails,
    DownloadFile, DownloadState, DownloadStatus, DownloadTracker, DownloaderConfig,
    DownloaderError, DownloaderType,
};

/// qBittorrent client for one configured downloader.
pub struct QBittorrentClient {
    client: Client,
    config: DownloaderConfig,
    base_url: String,
    resolver: PayloadResolver,
    /// Set after a successful login; the SID cookie lives in the jar.
    authenticated: RwLock<bool>,
}

impl QBittorrentClient {
    pub fn new(config: DownloaderConfig, timeout: Duration) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| DownloaderError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url: config.endpoint(""),
            resolver: PayloadResolver::new(timeout)?,
            client,
            config,
            authenticated: RwLock::new(false),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2{}", self.base_url, endpoint)
    }

    /// Login and keep the session cookie.
    async fn login(&self) -> Result<(), DownloaderError> {
        let params = [
            ("username", self.config.username()),
            ("password", self.config.password()),
        ];

        let response = self
            .client
            .post(self.url("/auth/login"))
            // qBittorrent rejects logins whose Referer does not match its host.
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() && body.contains("Ok.") {
            debug!(downloader = %self.config.id, "qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(DownloaderError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(DownloaderError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), DownloaderError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send an authenticated request, logging in again once on 403.
    async fn send<F>(&self, build: F) -> Result<Response, DownloaderError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let response = build().send().await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        warn!(downloader = %self.config.id, "qBittorrent session expired, re-authenticating");
        *self.authenticated.write().await = false;
        self.login().await?;
        Ok(build().send().await?)
    }

    async fn get(&self, endpoint: &str) -> Result<String, DownloaderError> {
        let url = self.url(endpoint);
        let response = self.send(|| self.client.get(&url)).await?;
        body_of(response).await
    }

    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Response, DownloaderError> {
        let url = self.url(endpoint);
        self.send(|| self.client.post(&url).form(params)).await
    }

    /// POST to the v4 endpoint, falling back to the v5 name on 404.
    async fn post_versioned(
        &self,
        v4: &str,
        v5: &str,
        params: &[(&str, &str)],
    ) -> Result<ActionResult, DownloaderError> {
        let response = self.post_form(v4, params).await?;
        let response = if response.status() == StatusCode::NOT_FOUND {
            debug!(downloader = %self.config.id, endpoint = v5, "Using qBittorrent v5 endpoint");
            self.post_form(v5, params).await?
        } else {
            response
        };
        body_of(response).await?;
        Ok(ActionResult::ok())
    }

    async fn torrents(&self, hash: Option<&str>) -> Result<Vec<QBTorrentInfo>, DownloaderError> {
        let endpoint = match hash {
            Some(hash) => format!("/torrents/info?hashes={}", hash.to_lowercase()),
            None => "/torrents/info".to_string(),
        };
        let body = self.get(&endpoint).await?;
        parse_json(&body)
    }

    fn add_form(&self, request: &AddDownloadRequest) -> multipart::Form {
        let mut form = multipart::Form::new();
        if let Some(path) = request
            .download_path
            .as_ref()
            .or(self.config.download_path.as_ref())
        {
            form = form.text("savepath", path.clone());
        }
        if let Some(category) = request.category.as_ref().or(self.config.category.as_ref()) {
            form = form.text("category", category.clone());
        }
        if let Some(label) = &self.config.label {
            form = form.text("tags", label.clone());
        }
        if self.config.add_stopped {
            form = form.text("paused", "true").text("stopped", "true");
        }
        form
    }
}

async fn body_of(response: Response) -> Result<String, DownloaderError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DownloaderError::ApiError(format!("HTTP {}", status)));
    }
    Ok(response.text().await?)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, DownloaderError> {
    serde_json::from_str(body).map_err(|e| DownloaderError::ParseError(e.to_string()))
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    size: i64,
    #[serde(default)]
    downloaded: i64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    upspeed: i64,
    #[serde(default)]
    num_seeds: i64,
    #[serde(default)]
    num_leechs: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    eta: i64,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    category: String,
}

impl QBTorrentInfo {
    fn into_status(self) -> DownloadStatus {
        let mut status = DownloadStatus::new(
            self.hash.to_lowercase(),
            self.name,
            parse_qb_state(&self.state),
        );
        status.progress = (self.progress * 100.0).clamp(0.0, 100.0);
        status.size = self.size.max(0) as u64;
        status.downloaded = self.downloaded.max(0) as u64;
        status.download_speed = self.dlspeed.max(0) as u64;
        status.upload_speed = self.upspeed.max(0) as u64;
        status.seeders = Some(self.num_seeds.max(0) as u32);
        status.leechers = Some(self.num_leechs.max(0) as u32);
        status.ratio = Some(self.ratio);
        // 8640000 is qBittorrent's "infinity".
        status.eta = (self.eta > 0 && self.eta < 8_640_000).then_some(self.eta as u64);
        status.added_at = timestamp_to_datetime(self.added_on);
        status.save_path = (!self.save_path.is_empty()).then_some(self.save_path);
        status.category = (!self.category.is_empty()).then_some(self.category);
        status
    }
}

#[derive(Debug, Deserialize)]
struct QBProperties {
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    completion_date: i64,
}

#[derive(Debug, Deserialize)]
struct QBFile {
    name: String,
    size: i64,
    progress: f64,
    #[serde(default = "default_file_priority")]
    priority: i64,
}

fn default_file_priority() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct QBTracker {
    url: String,
    /// Numeric for real trackers, an empty string for DHT/PeX rows.
    #[serde(default)]
    tier: serde_json::Value,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct QBMainData {
    server_state: QBServerState,
}

#[derive(Debug, Deserialize)]
struct QBServerState {
    #[serde(default)]
    free_space_on_disk: i64,
}

/// Parse qBittorrent state string to DownloadState.
fn parse_qb_state(state: &str) -> DownloadState {
    match state {
        "uploading" | "forcedUP" | "stalledUP" | "queuedUP" | "checkingUP" => {
            DownloadState::Seeding
        }
        "pausedDL" | "stoppedDL" => DownloadState::Paused,
        "pausedUP" | "stoppedUP" => DownloadState::Completed,
        "error" | "missingFiles" => DownloadState::Error,
        _ => DownloadState::Downloading,
    }
}

fn tracker_status(status: i64) -> &'static str {
    match status {
        0 => "disabled",
        1 => "not_contacted",
        2 => "working",
        3 => "updating",
        _ => "not_working",
    }
}

/// Convert Unix timestamp to DateTime<Utc>.
fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

#[async_trait]
impl DownloadClient for QBittorrentClient {
    fn client_type(&self) -> DownloaderType {
        DownloaderType::Qbittorrent
    }

    async fn add_download(
        &self,
        request: &AddDownloadRequest,
    ) -> Result<AddDownloadResult, DownloaderError> {
        let payload = self.resolver.resolve(&request.url).await?;
        let Some(hash) = payload.hash().map(str::to_string) else {
            return Ok(AddDownloadResult::rejected(
                "Could not determine the info hash of the magnet link",
            ));
        };

        let url = self.url("/torrents/add");
        let response = self
            .send(|| {
                let form = match &payload {
                    TorrentPayload::Magnet { uri, .. } => {
                        self.add_form(request).text("urls", uri.clone())
                    }
                    TorrentPayload::File { bytes, .. } => {
                        let part = multipart::Part::bytes(bytes.clone())
                            .file_name(format!("{}.torrent", hash));
                        self.add_form(request).part("torrents", part)
                    }
                };
                self.client.post(&url).multipart(form)
            })
            .await?;

        if response.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Ok(AddDownloadResult::rejected("qBittorrent rejected the torrent file"));
        }
        let refused = if response.status() == StatusCode::CONFLICT {
            true
        } else {
            body_of(response).await?.contains("Fails.")
        };
        if refused {
            // An already-present torrent is refused the same way as a broken one.
            if self.get_download(&hash).await?.is_some() {
                debug!(
                    downloader = %self.config.id,
                    hash = %hash,
                    "Torrent already in qBittorrent"
                );
                return Ok(AddDownloadResult::accepted(hash));
            }
            return Ok(AddDownloadResult::rejected("qBittorrent rejected the torrent"));
        }
        Ok(AddDownloadResult::accepted(hash))
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let torrents = self.torrents(None).await?;
        Ok(torrents.into_iter().map(QBTorrentInfo::into_status).collect())
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadStatus>, DownloaderError> {
        let torrents = self.torrents(Some(id)).await?;
        Ok(torrents.into_iter().next().map(QBTorrentInfo::into_status))
    }

    async fn get_details(&self, id: &str) -> Result<Option<DownloadDetails>, DownloaderError> {
        let Some(status) = self.get_download(id).await? else {
            return Ok(None);
        };
        let hash = status.id.clone();

        let properties: QBProperties =
            parse_json(&self.get(&format!("/torrents/properties?hash={}", hash)).await?)?;
        let files: Vec<QBFile> =
            parse_json(&self.get(&format!("/torrents/files?hash={}", hash)).await?)?;
        let trackers: Vec<QBTracker> =
            parse_json(&self.get(&format!("/torrents/trackers?hash={}", hash)).await?)?;

        let mut details = DownloadDetails::from_status(status);
        details.hash = Some(hash);
        if !properties.save_path.is_empty() {
            details.download_dir = Some(properties.save_path);
        }
        details.comment = (!properties.comment.is_empty()).then_some(properties.comment);
        details.completed_at = timestamp_to_datetime(properties.completion_date);
        details.files = files
            .into_iter()
            .map(|f| DownloadFile {
                name: f.name,
                size: f.size.max(0) as u64,
                progress: (f.progress * 100.0).clamp(0.0, 100.0),
                wanted: f.priority != 0,
            })
            .collect();
        details.trackers = trackers
            .into_iter()
            // DHT/PeX/LSD pseudo trackers
            .filter(|t| !t.url.starts_with("** ["))
            .map(|t| DownloadTracker {
                url: t.url,
                tier: t.tier.as_u64().and_then(|t| u32::try_from(t).ok()),
                status: Some(tracker_status(t.status).to_string()),
                message: (!t.msg.is_empty()).then_some(t.msg),
            })
            .collect();
        Ok(Some(details))
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        let hash = id.to_lowercase();
        self.post_versioned("/torrents/pause", "/torrents/stop", &[("hashes", hash.as_str())])
            .await
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        let hash = id.to_lowercase();
        self.post_versioned("/torrents/resume", "/torrents/start", &[("hashes", hash.as_str())])
            .await
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        let hash = id.to_lowercase();
        let delete = if delete_files { "true" } else { "false" };
        let response = self
            .post_form("/torrents/delete", &[("hashes", hash.as_str()), ("deleteFiles", delete)])
            .await?;
        body_of(response).await?;
        Ok(ActionResult::ok())
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        let data: QBMainData = parse_json(&self.get("/sync/maindata").await?)?;
        Ok(data.server_state.free_space_on_disk.max(0) as u64)
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        Ok(self.get("/app/version").await?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::searcher::DownloadType;
    use crate::testing::fixtures;

    const MAGNET: &str = "magnet:?xt=urn:btih:ABC123&dn=Foo";

    async fn server_with_login(logins: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(logins)
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> QBittorrentClient {
        let mut config = fixtures::downloader_config("qb", DownloaderType::Qbittorrent, 1);
        config.host = server.uri();
        config.username = Some("admin".to_string());
        config.password = Some("secret".to_string());
        QBittorrentClient::new(config, Duration::from_secs(5)).unwrap()
    }

    fn info_row(hash: &str) -> serde_json::Value {
        json!([{
            "hash": hash,
            "name": "Foo",
            "state": "downloading",
            "progress": 0.1,
            "size": 100
        }])
    }

    #[test]
    fn test_parse_qb_state_downloading() {
        assert_eq!(parse_qb_state("downloading"), DownloadState::Downloading);
        assert_eq!(parse_qb_state("forcedDL"), DownloadState::Downloading);
        assert_eq!(parse_qb_state("metaDL"), DownloadState::Downloading);
        assert_eq!(parse_qb_state("stalledDL"), DownloadState::Downloading);
    }

    #[test]
    fn test_parse_qb_state_seeding() {
        assert_eq!(parse_qb_state("uploading"), DownloadState::Seeding);
        assert_eq!(parse_qb_state("stalledUP"), DownloadState::Seeding);
    }

    #[test]
    fn test_parse_qb_state_paused_and_completed() {
        assert_eq!(parse_qb_state("pausedDL"), DownloadState::Paused);
        assert_eq!(parse_qb_state("stoppedDL"), DownloadState::Paused);
        assert_eq!(parse_qb_state("pausedUP"), DownloadState::Completed);
        assert_eq!(parse_qb_state("stoppedUP"), DownloadState::Completed);
    }

    #[test]
    fn test_parse_qb_state_error() {
        assert_eq!(parse_qb_state("error"), DownloadState::Error);
        assert_eq!(parse_qb_state("missingFiles"), DownloadState::Error);
    }

    #[test]
    fn test_timestamp_to_datetime() {
        assert_eq!(timestamp_to_datetime(1703980800).unwrap().year(), 2023);
        assert!(timestamp_to_datetime(-1).is_none());
        assert!(timestamp_to_datetime(0).is_none());
    }

    #[test]
    fn test_qb_torrent_info_conversion() {
        let json = r#"{
            "hash": "ABC123",
            "name": "Test Game",
            "state": "downloading",
            "progress": 0.5,
            "size": 1000000,
            "downloaded": 500000,
            "dlspeed": 10000,
            "upspeed": 1000,
            "num_seeds": 10,
            "num_leechs": 5,
            "ratio": 0.2,
            "eta": 8640000,
            "added_on": 1703980800,
            "save_path": "/downloads",
            "category": ""
        }"#;
        let info: QBTorrentInfo = serde_json::from_str(json).unwrap();
        let status = info.into_status();
        assert_eq!(status.id, "abc123");
        assert_eq!(status.status, DownloadState::Downloading);
        assert!((status.progress - 50.0).abs() < 0.001);
        assert_eq!(status.size, 1000000);
        assert_eq!(status.eta, None);
        assert_eq!(status.category, None);
        assert_eq!(status.save_path.as_deref(), Some("/downloads"));
    }

    #[test]
    fn test_tracker_status_names() {
        assert_eq!(tracker_status(2), "working");
        assert_eq!(tracker_status(4), "not_working");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let config: DownloaderConfig = serde_json::from_str(
            r#"{"id":"qb","name":"qB","type":"qbittorrent","host":"127.0.0.1","port":1}"#,
        )
        .unwrap();
        let client = QBittorrentClient::new(config, Duration::from_secs(2)).unwrap();
        let result = client
            .add_download(&AddDownloadRequest::new(
                "magnet:?xt=urn:btih:abc",
                "X",
                crate::searcher::DownloadType::Torrent,
            ))
            .await;
        assert!(result.is_err());

        let check = client.test_connection().await;
        assert!(!check.success);
        assert!(!check.message.is_empty());
    }

    #[tokio::test]
    async fn test_login_again_after_forbidden() {
        let server = server_with_login(2).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/app/version"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/app/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.2\n"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.version().await.unwrap(), "v4.6.2");
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let result = client_for(&server).version().await;
        assert!(matches!(result, Err(DownloaderError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_pause_falls_back_to_stop_endpoint() {
        let server = server_with_login(1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/pause"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/stop"))
            .and(body_string_contains("hashes=abc123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).pause("ABC123").await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_resume_uses_v4_endpoint_when_present() {
        let server = server_with_login(1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/resume"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/start"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client_for(&server).resume("abc123").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_add_magnet() {
        let server = server_with_login(1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(body_string_contains(MAGNET))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let request = AddDownloadRequest::new(MAGNET, "Foo", DownloadType::Torrent);
        let result = client_for(&server).add_download(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_duplicate_torrent_is_accepted() {
        let server = server_with_login(1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(query_param("hashes", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info_row("ABC123")))
            .expect(1)
            .mount(&server)
            .await;

        let request = AddDownloadRequest::new(MAGNET, "Foo", DownloadType::Torrent);
        let result = client_for(&server).add_download(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_refused_torrent_not_in_client_is_rejected() {
        let server = server_with_login(1).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let request = AddDownloadRequest::new(MAGNET, "Foo", DownloadType::Torrent);
        let result = client_for(&server).add_download(&request).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("qBittorrent rejected the torrent"));
    }
}
