//! Testing utilities and mock implementations.
//!
//! Mocks for the two seams of the acquisition layer: protocol searchers
//! (injected into `SearchAggregator`) and download clients (handed out by a
//! `ClientFactory` to the `DownloadDispatcher`). No network is involved.
//!
//! # Example
//!
//! ```rust,ignore
//! use gamearr_core::testing::{fixtures, MockClientFactory, MockDownloadClient};
//!
//! let factory = MockClientFactory::new();
//! let offline = MockDownloadClient::new(DownloaderType::Qbittorrent);
//! offline.fail_with(DownloaderError::ConnectionFailed("refused".into())).await;
//! factory.insert("qb", offline);
//! factory.insert("tr", MockDownloadClient::new(DownloaderType::Transmission));
//!
//! let dispatcher = DownloadDispatcher::new(Arc::new(factory), Duration::from_secs(5));
//! ```

mod mock_client_factory;
mod mock_download_client;
mod mock_searcher;

pub use mock_client_factory::MockClientFactory;
pub use mock_download_client::MockDownloadClient;
pub use mock_searcher::{MockProtocolSearcher, RecordedSearch};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Utc};

    use crate::downloader::{DownloaderConfig, DownloaderType};
    use crate::searcher::{Indexer, IndexerProtocol, RawSearchItem};

    /// An enabled indexer named after its id.
    pub fn indexer(id: &str, protocol: IndexerProtocol) -> Indexer {
        Indexer {
            id: id.to_string(),
            name: id.to_string(),
            url: format!("http://{}.invalid", id),
            api_key: "test-key".to_string(),
            protocol,
            enabled: true,
            priority: 50,
            categories: Vec::new(),
            rss_enabled: true,
            auto_search_enabled: true,
        }
    }

    /// An enabled downloader named after its id.
    pub fn downloader_config(
        id: &str,
        client_type: DownloaderType,
        priority: i32,
    ) -> DownloaderConfig {
        DownloaderConfig {
            id: id.to_string(),
            name: id.to_string(),
            client_type,
            enabled: true,
            priority,
            host: "localhost".to_string(),
            port: None,
            use_ssl: false,
            url_path: None,
            username: None,
            password: None,
            api_key: Some("test-key".to_string()),
            download_path: None,
            category: None,
            label: None,
            add_stopped: false,
            remove_completed: false,
            post_import_category: None,
        }
    }

    /// A feed item published at `pub_date` (RFC 3339; unparsable means no date).
    pub fn raw_item(title: &str, pub_date: &str) -> RawSearchItem {
        let slug = title.to_lowercase().replace(' ', "-");
        RawSearchItem {
            title: title.to_string(),
            link: format!("http://indexer.invalid/download/{}", slug),
            guid: Some(format!("guid-{}", slug)),
            pub_date: DateTime::parse_from_rfc3339(pub_date)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            size: Some(1024 * 1024 * 512),
            ..Default::default()
        }
    }

    /// A Torznab item with swarm counts.
    pub fn torrent_item(title: &str, pub_date: &str, seeders: u32, peers: u32) -> RawSearchItem {
        RawSearchItem {
            seeders: Some(seeders),
            peers: Some(peers),
            ..raw_item(title, pub_date)
        }
    }

    /// A Newznab item with a grab count.
    pub fn usenet_item(title: &str, pub_date: &str, grabs: u32) -> RawSearchItem {
        RawSearchItem {
            grabs: Some(grabs),
            group: Some("alt.binaries.games".to_string()),
            ..raw_item(title, pub_date)
        }
    }
}
