//! rTorrent XML-RPC client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use super::payload::{PayloadResolver, TorrentPayload};
use super::xmlrpc::{self, Value};
use super::{
    ActionResult, AddDownloadRequest, AddDownloadResult, DownloadClient, DownloadDetails,
    DownloadFile, DownloadState, DownloadStatus, DownloadTracker, DownloaderConfig,
    DownloaderError, DownloaderType,
};

const DEFAULT_PATH: &str = "/RPC2";

/// Columns requested from `d.multicall2`, in row order.
const LIST_FIELDS: &[&str] = &[
    "d.hash=",
    "d.name=",
    "d.size_bytes=",
    "d.completed_bytes=",
    "d.down.rate=",
    "d.up.rate=",
    "d.state=",
    "d.is_active=",
    "d.complete=",
    "d.hashing=",
    "d.message=",
    "d.directory=",
    "d.custom1=",
    "d.ratio=",
    "d.peers_complete=",
    "d.peers_accounted=",
    "d.timestamp.started=",
];

/// rTorrent client for one configured downloader.
pub struct RTorrentClient {
    client: Client,
    config: DownloaderConfig,
    url: String,
    resolver: PayloadResolver,
}

impl RTorrentClient {
    pub fn new(config: DownloaderConfig, timeout: Duration) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloaderError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            url: config.endpoint(DEFAULT_PATH),
            resolver: PayloadResolver::new(timeout)?,
            client,
            config,
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, DownloaderError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "text/xml")
            .body(xmlrpc::encode_call(method, params));
        if self.config.has_credentials() {
            request = request.basic_auth(self.config.username(), Some(self.config.password()));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                DownloaderError::AuthenticationFailed("Invalid credentials".to_string()),
            ),
            status if !status.is_success() => {
                Err(DownloaderError::ApiError(format!("HTTP {}", status)))
            }
            _ => xmlrpc::decode_response(&response.text().await?),
        }
    }

    /// `d.*` commands applied while loading.
    fn load_commands(&self, request: &AddDownloadRequest) -> Vec<Value> {
        let mut commands = Vec::new();
        if let Some(dir) = request
            .download_path
            .as_ref()
            .or(self.config.download_path.as_ref())
        {
            commands.push(Value::from(format!("d.directory.set={}", quote_arg(dir))));
        }
        if let Some(label) = request
            .category
            .as_ref()
            .or(self.config.label.as_ref())
            .or(self.config.category.as_ref())
        {
            // custom1 is the ruTorrent label column.
            commands.push(Value::from(format!(
                "d.custom1.set=\"{}\"",
                urlencoding::encode(label)
            )));
        }
        commands
    }

    async fn single(&self, method: &str, id: &str) -> Result<Value, DownloaderError> {
        self.call(method, &[Value::from(native_hash(id))]).await
    }
}

/// Double-quoted rTorrent command argument.
fn quote_arg(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// rTorrent keys downloads by uppercase hash.
fn native_hash(id: &str) -> String {
    id.to_uppercase()
}

fn int(row: &[Value], idx: usize) -> i64 {
    row.get(idx).and_then(Value::as_i64).unwrap_or(0)
}

fn text(row: &[Value], idx: usize) -> String {
    row.get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

fn parse_row(row: &[Value]) -> DownloadStatus {
    let size = int(row, 2).max(0) as u64;
    let done = int(row, 3).max(0) as u64;
    let started = int(row, 6) != 0;
    let active = int(row, 7) != 0;
    let complete = int(row, 8) != 0;
    let hashing = int(row, 9) != 0;
    let message = text(row, 10);

    let state = if hashing {
        DownloadState::Downloading
    } else if !started && !message.is_empty() && !complete {
        DownloadState::Error
    } else if !started || !active {
        if complete {
            DownloadState::Completed
        } else {
            DownloadState::Paused
        }
    } else if complete {
        DownloadState::Seeding
    } else {
        DownloadState::Downloading
    };

    let mut status = DownloadStatus::new(text(row, 0).to_lowercase(), text(row, 1), state);
    status.size = size;
    status.downloaded = done;
    status.progress = if size > 0 {
        (done as f64 / size as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    status.download_speed = int(row, 4).max(0) as u64;
    status.upload_speed = int(row, 5).max(0) as u64;
    if status.download_speed > 0 && size > done {
        status.eta = Some((size - done) / status.download_speed);
    }
    let dir = text(row, 11);
    status.save_path = (!dir.is_empty()).then_some(dir);
    let label = text(row, 12);
    if !label.is_empty() {
        status.category = Some(
            urlencoding::decode(&label)
                .map(|l| l.into_owned())
                .unwrap_or_else(|_| label.clone()),
        );
    }
    // d.ratio is scaled by 1000.
    status.ratio = Some(int(row, 13) as f64 / 1000.0);
    status.seeders = Some(int(row, 14).max(0) as u32);
    status.leechers = Some((int(row, 15) - int(row, 14)).max(0) as u32);
    status.added_at = timestamp(int(row, 16));
    if state == DownloadState::Error {
        status.error_message = Some(message);
    }
    status
}

fn multicall_rows(value: &Value) -> impl Iterator<Item = &[Value]> {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_array)
}

#[async_trait]
impl DownloadClient for RTorrentClient {
    fn client_type(&self) -> DownloaderType {
        DownloaderType::Rtorrent
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

        let start = !self.config.add_stopped;
        let (method, data) = match payload {
            TorrentPayload::File { bytes, .. } => (
                if start { "load.raw_start" } else { "load.raw" },
                Value::Base64(bytes),
            ),
            TorrentPayload::Magnet { uri, .. } => (
                if start { "load.start" } else { "load.normal" },
                Value::String(uri),
            ),
        };

        let mut params = vec![Value::from(""), data];
        params.extend(self.load_commands(request));

        let result = self.call(method, &params).await?;
        if result.as_i64() != Some(0) {
            return Ok(AddDownloadResult::rejected(format!(
                "rTorrent {} returned {:?}",
                method, result
            )));
        }
        debug!(downloader = %self.config.id, hash = %hash, "rTorrent accepted download");
        Ok(AddDownloadResult::accepted(hash))
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadStatus>, DownloaderError> {
        let mut params = vec![Value::from(""), Value::from("main")];
        params.extend(LIST_FIELDS.iter().map(|f| Value::from(*f)));
        let result = self.call("d.multicall2", &params).await?;
        Ok(multicall_rows(&result).map(parse_row).collect())
    }

    async fn get_details(&self, id: &str) -> Result<Option<DownloadDetails>, DownloaderError> {
        let Some(status) = self.get_download(id).await? else {
            return Ok(None);
        };
        let hash = native_hash(&status.id);

        let files = self
            .call(
                "f.multicall",
                &[
                    Value::from(hash.clone()),
                    Value::from(""),
                    Value::from("f.path="),
                    Value::from("f.size_bytes="),
                    Value::from("f.completed_chunks="),
                    Value::from("f.size_chunks="),
                    Value::from("f.priority="),
                ],
            )
            .await?;
        let trackers = self
            .call(
                "t.multicall",
                &[
                    Value::from(hash.clone()),
                    Value::from(""),
                    Value::from("t.url="),
                    Value::from("t.group="),
                    Value::from("t.is_enabled="),
                ],
            )
            .await?;

        let mut details = DownloadDetails::from_status(status);
        details.hash = Some(hash.to_lowercase());
        details.files = multicall_rows(&files)
            .map(|row| {
                let chunks = int(row, 3);
                DownloadFile {
                    name: text(row, 0),
                    size: int(row, 1).max(0) as u64,
                    progress: if chunks > 0 {
                        (int(row, 2) as f64 / chunks as f64 * 100.0).clamp(0.0, 100.0)
                    } else {
                        0.0
                    },
                    wanted: int(row, 4) != 0,
                }
            })
            .collect();
        details.trackers = multicall_rows(&trackers)
            .map(|row| DownloadTracker {
                url: text(row, 0),
                tier: u32::try_from(int(row, 1)).ok(),
                status: Some(if int(row, 2) != 0 { "enabled" } else { "disabled" }.to_string()),
                message: None,
            })
            .collect();
        Ok(Some(details))
    }

    async fn pause(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.single("d.stop", id).await?;
        Ok(ActionResult::ok())
    }

    async fn resume(&self, id: &str) -> Result<ActionResult, DownloaderError> {
        self.single("d.start", id).await?;
        Ok(ActionResult::ok())
    }

    async fn remove(&self, id: &str, delete_files: bool) -> Result<ActionResult, DownloaderError> {
        let base_path = if delete_files {
            self.single("d.base_path", id)
                .await?
                .as_str()
                .map(str::to_string)
        } else {
            None
        };

        self.single("d.erase", id).await?;

        if let Some(path) = base_path {
            let trimmed = path.trim();
            if trimmed.is_empty() || trimmed == "/" {
                warn!(
                    downloader = %self.config.id,
                    path = %path,
                    "Refusing to delete data at unsafe path"
                );
                return Ok(ActionResult::failed(
                    "Download removed but its data path was unsafe to delete",
                ));
            }
            self.call(
                "execute.throw.bg",
                &[
                    Value::from(""),
                    Value::from("rm"),
                    Value::from("-rf"),
                    Value::from(trimmed),
                ],
            )
            .await?;
        }
        Ok(ActionResult::ok())
    }

    async fn free_space(&self) -> Result<u64, DownloaderError> {
        Err(DownloaderError::NotSupported {
            client: "rtorrent",
            operation: "free space",
        })
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        let version = self.call("system.client_version", &[]).await?;
        Ok(version.as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::searcher::DownloadType;
    use crate::testing::fixtures;

    fn xml_response(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param>\
             <value>{}</value></param></params></methodResponse>",
            value
        ))
    }

    fn client_for(server: &MockServer) -> RTorrentClient {
        let mut config = fixtures::downloader_config("rt", DownloaderType::Rtorrent, 1);
        config.host = server.uri();
        config.download_path = Some("/data/games".to_string());
        RTorrentClient::new(config, Duration::from_secs(5)).unwrap()
    }

    fn row(state: i64, active: i64, complete: i64, message: &str) -> Vec<Value> {
        vec![
            Value::from("ABCDEF"),
            Value::from("Game"),
            Value::Int(1000),
            Value::Int(250),
            Value::Int(50),
            Value::Int(10),
            Value::Int(state),
            Value::Int(active),
            Value::Int(complete),
            Value::Int(0),
            Value::from(message),
            Value::from("/data/Game"),
            Value::from("my%20games"),
            Value::Int(1500),
            Value::Int(4),
            Value::Int(9),
            Value::Int(1700000000),
        ]
    }

    #[test]
    fn test_parse_row_downloading() {
        let status = parse_row(&row(1, 1, 0, ""));
        assert_eq!(status.id, "abcdef");
        assert_eq!(status.status, DownloadState::Downloading);
        assert!((status.progress - 25.0).abs() < f64::EPSILON);
        assert_eq!(status.eta, Some(15));
        assert_eq!(status.category.as_deref(), Some("my games"));
        assert_eq!(status.ratio, Some(1.5));
        assert_eq!(status.seeders, Some(4));
        assert_eq!(status.leechers, Some(5));
    }

    #[test]
    fn test_parse_row_states() {
        assert_eq!(parse_row(&row(0, 0, 0, "")).status, DownloadState::Paused);
        assert_eq!(parse_row(&row(1, 0, 0, "")).status, DownloadState::Paused);
        assert_eq!(parse_row(&row(0, 0, 1, "")).status, DownloadState::Completed);
        assert_eq!(parse_row(&row(1, 1, 1, "")).status, DownloadState::Seeding);

        let failed = parse_row(&row(0, 0, 0, "Tracker: [Failure reason \"unregistered\"]"));
        assert_eq!(failed.status, DownloadState::Error);
        assert!(failed.error_message.is_some());
    }

    #[test]
    fn test_load_commands() {
        let config: DownloaderConfig = serde_json::from_str(
            r#"{"id":"rt","name":"rT","type":"rtorrent","host":"localhost",
                "download_path":"/data","label":"games"}"#,
        )
        .unwrap();
        let client = RTorrentClient::new(config, Duration::from_secs(1)).unwrap();
        let request = AddDownloadRequest::new(
            "magnet:?xt=urn:btih:abc",
            "X",
            crate::searcher::DownloadType::Torrent,
        );
        let commands = client.load_commands(&request);
        assert_eq!(commands[0], Value::from("d.directory.set=\"/data\""));
        assert_eq!(commands[1], Value::from("d.custom1.set=\"games\""));
        assert_eq!(client.url, "http://localhost/RPC2");
    }

    #[tokio::test]
    async fn test_free_space_not_supported() {
        let config: DownloaderConfig =
            serde_json::from_str(r#"{"id":"rt","name":"rT","type":"rtorrent","host":"localhost"}"#)
                .unwrap();
        let client = RTorrentClient::new(config, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.free_space().await,
            Err(DownloaderError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_directory_argument_is_escaped() {
        assert_eq!(quote_arg("/data"), "\"/data\"");
        assert_eq!(
            quote_arg(r#"/data/say "hi"\games"#),
            r#""/data/say \"hi\"\\games""#
        );

        let config: DownloaderConfig =
            serde_json::from_str(r#"{"id":"rt","name":"rT","type":"rtorrent","host":"localhost"}"#)
                .unwrap();
        let client = RTorrentClient::new(config, Duration::from_secs(1)).unwrap();
        let request =
            AddDownloadRequest::new("magnet:?xt=urn:btih:abc", "X", DownloadType::Torrent)
                .with_download_path(r#"C:\Games\"Best""#);
        let commands = client.load_commands(&request);
        assert_eq!(
            commands[0],
            Value::from(r#"d.directory.set="C:\\Games\\\"Best\"""#)
        );
    }

    #[tokio::test]
    async fn test_add_magnet_over_xmlrpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/RPC2"))
            .and(body_string_contains("<methodName>load.start</methodName>"))
            .and(body_string_contains("magnet:?xt=urn:btih:ABC123"))
            .and(body_string_contains("d.directory.set=&quot;/data/games&quot;"))
            .respond_with(xml_response("<i4>0</i4>"))
            .expect(1)
            .mount(&server)
            .await;

        let request =
            AddDownloadRequest::new("magnet:?xt=urn:btih:ABC123", "Foo", DownloadType::Torrent);
        let result = client_for(&server).add_download(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_add_torrent_file_over_xmlrpc() {
        let mut torrent = b"d8:announce28:http://tracker.test/announce".to_vec();
        torrent.extend_from_slice(b"4:infod6:lengthi1024e4:name8:game.iso");
        torrent.extend_from_slice(b"12:piece lengthi16384e6:pieces20:");
        torrent.extend_from_slice(&[7u8; 20]);
        torrent.extend_from_slice(b"ee");
        let hash = crate::downloader::torrent_info_hash(&torrent).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/1.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(torrent))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/RPC2"))
            .and(body_string_contains("<methodName>load.raw_start</methodName>"))
            .and(body_string_contains("<base64>"))
            .respond_with(xml_response("<i4>0</i4>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/dl/1.torrent", server.uri());
        let request = AddDownloadRequest::new(url, "Foo", DownloadType::Torrent);
        let result = client_for(&server).add_download(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.id, Some(hash));
    }

    #[tokio::test]
    async fn test_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/RPC2"))
            .and(body_string_contains("system.client_version"))
            .respond_with(xml_response("<string>0.9.8</string>"))
            .mount(&server)
            .await;

        let check = client_for(&server).test_connection().await;
        assert!(check.success);
        assert_eq!(check.message, "Connected to rtorrent 0.9.8");
    }
}
