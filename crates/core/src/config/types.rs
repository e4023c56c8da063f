use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::downloader::{DownloaderConfig, DownloaderType};
use crate::searcher::{Indexer, IndexerProtocol};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub indexers: Vec<Indexer>,
    #[serde(default)]
    pub downloaders: Vec<DownloaderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timeouts: TimeoutConfig::default(),
            indexers: Vec::new(),
            downloaders: Vec::new(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Upper bounds for a single indexer or downloader call inside a fan-out.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Per-indexer search timeout in seconds (default: 20)
    #[serde(default = "default_timeout")]
    pub indexer_secs: u32,
    /// Per-downloader call timeout in seconds (default: 20)
    #[serde(default = "default_timeout")]
    pub downloader_secs: u32,
}

impl TimeoutConfig {
    pub fn indexer(&self) -> Duration {
        Duration::from_secs(self.indexer_secs as u64)
    }

    pub fn downloader(&self) -> Duration {
        Duration::from_secs(self.downloader_secs as u64)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            indexer_secs: default_timeout(),
            downloader_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u32 {
    20
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub timeouts: TimeoutConfig,
    pub indexers: Vec<SanitizedIndexer>,
    pub downloaders: Vec<SanitizedDownloader>,
}

/// Sanitized indexer (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedIndexer {
    pub id: String,
    pub name: String,
    pub url: String,
    pub protocol: IndexerProtocol,
    pub enabled: bool,
    pub priority: i32,
    pub categories: Vec<String>,
    pub api_key_configured: bool,
}

/// Sanitized downloader (credentials hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDownloader {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub client_type: DownloaderType,
    pub enabled: bool,
    pub priority: i32,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub use_ssl: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password_configured: bool,
    pub api_key_configured: bool,
}

impl From<&Indexer> for SanitizedIndexer {
    fn from(indexer: &Indexer) -> Self {
        Self {
            id: indexer.id.clone(),
            name: indexer.name.clone(),
            url: indexer.url.clone(),
            protocol: indexer.protocol,
            enabled: indexer.enabled,
            priority: indexer.priority,
            categories: indexer.categories.clone(),
            api_key_configured: !indexer.api_key.is_empty(),
        }
    }
}

impl From<&DownloaderConfig> for SanitizedDownloader {
    fn from(d: &DownloaderConfig) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            client_type: d.client_type,
            enabled: d.enabled,
            priority: d.priority,
            host: d.host.clone(),
            port: d.port,
            use_ssl: d.use_ssl,
            username: d.username.clone(),
            password_configured: d.password.as_deref().is_some_and(|p| !p.is_empty()),
            api_key_configured: d.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            timeouts: config.timeouts.clone(),
            indexers: config.indexers.iter().map(SanitizedIndexer::from).collect(),
            downloaders: config
                .downloaders
                .iter()
                .map(SanitizedDownloader::from)
                .collect(),
        }
    }
}
