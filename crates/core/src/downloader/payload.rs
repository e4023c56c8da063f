//! Resolves a release link into something a torrent client can accept.
//!
//! qBittorrent and rTorrent need the info hash up front to report a native
//! id, so `.torrent` links are fetched and hashed locally. Indexers often
//! answer a download link with a redirect to a magnet URI; that redirect is
//! caught rather than followed.

use std::time::Duration;

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use reqwest::{header, redirect, Client};
use tracing::debug;

use super::DownloaderError;
use crate::searcher::btih_from_magnet;

const MAX_REDIRECTS: usize = 5;

/// A resolved torrent payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TorrentPayload {
    Magnet {
        uri: String,
        /// Lowercase btih, when the magnet carries one.
        hash: Option<String>,
    },
    File {
        bytes: Vec<u8>,
        /// Lowercase hex info hash.
        hash: String,
    },
}

impl TorrentPayload {
    pub fn hash(&self) -> Option<&str> {
        match self {
            TorrentPayload::Magnet { hash, .. } => hash.as_deref(),
            TorrentPayload::File { hash, .. } => Some(hash),
        }
    }
}

/// Fetches `.torrent` links without following redirects blindly.
pub struct PayloadResolver {
    client: Client,
}

impl PayloadResolver {
    pub fn new(timeout: Duration) -> Result<Self, DownloaderError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| DownloaderError::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn resolve(&self, url: &str) -> Result<TorrentPayload, DownloaderError> {
        if url.starts_with("magnet:") {
            return Ok(magnet(url));
        }

        let mut current = url.to_string();
        for _ in 0..=MAX_REDIRECTS {
            let response = self.client.get(&current).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        DownloaderError::ApiError(format!("HTTP {} without Location", status))
                    })?
                    .to_string();

                if location.starts_with("magnet:") {
                    debug!(url = %current, "Torrent link redirected to a magnet");
                    return Ok(magnet(&location));
                }
                current = resolve_location(&current, &location)?;
                continue;
            }

            if !status.is_success() {
                return Err(DownloaderError::ApiError(format!(
                    "Fetching torrent failed: HTTP {}",
                    status
                )));
            }

            let bytes = response.bytes().await?.to_vec();
            let hash = torrent_info_hash(&bytes)?;
            return Ok(TorrentPayload::File { bytes, hash });
        }

        Err(DownloaderError::ApiError(format!(
            "Too many redirects fetching {}",
            url
        )))
    }
}

fn magnet(uri: &str) -> TorrentPayload {
    TorrentPayload::Magnet {
        uri: uri.to_string(),
        hash: btih_from_magnet(uri),
    }
}

fn resolve_location(base: &str, location: &str) -> Result<String, DownloaderError> {
    let base = url::Url::parse(base).map_err(|e| DownloaderError::ParseError(e.to_string()))?;
    base.join(location)
        .map(|u| u.to_string())
        .map_err(|e| DownloaderError::ParseError(e.to_string()))
}

/// Lowercase hex info hash of a bencoded `.torrent` file.
pub fn torrent_info_hash(bytes: &[u8]) -> Result<String, DownloaderError> {
    let torrent: TorrentMetaV1Owned = torrent_from_bytes(bytes)
        .map_err(|e| DownloaderError::ParseError(format!("invalid torrent: {}", e)))?;
    Ok(torrent.info_hash.as_string())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn single_file_torrent() -> Vec<u8> {
        let mut bytes = b"d8:announce28:http://tracker.test/announce".to_vec();
        bytes.extend_from_slice(b"4:infod6:lengthi1024e4:name8:game.iso");
        bytes.extend_from_slice(b"12:piece lengthi16384e6:pieces20:");
        bytes.extend_from_slice(&[7u8; 20]);
        bytes.extend_from_slice(b"ee");
        bytes
    }

    #[test]
    fn test_torrent_info_hash() {
        let hash = torrent_info_hash(&single_file_torrent()).unwrap();
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, torrent_info_hash(&single_file_torrent()).unwrap());
    }

    #[test]
    fn test_torrent_info_hash_invalid() {
        assert!(matches!(
            torrent_info_hash(b"not a torrent"),
            Err(DownloaderError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_magnet_without_request() {
        let resolver = PayloadResolver::new(Duration::from_secs(1)).unwrap();
        let payload = resolver
            .resolve("magnet:?xt=urn:btih:ABCDEF&dn=Game")
            .await
            .unwrap();
        assert_eq!(payload.hash(), Some("abcdef"));
    }

    #[test]
    fn test_resolve_relative_location() {
        assert_eq!(
            resolve_location("http://idx.test/dl/1?x=1", "/files/1.torrent").unwrap(),
            "http://idx.test/files/1.torrent"
        );
    }

    #[tokio::test]
    async fn test_redirect_to_magnet_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/1"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "magnet:?xt=urn:btih:FEEDBEEF&dn=Game"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = PayloadResolver::new(Duration::from_secs(5)).unwrap();
        let payload = resolver.resolve(&format!("{}/dl/1", server.uri())).await.unwrap();
        assert_eq!(
            payload,
            TorrentPayload::Magnet {
                uri: "magnet:?xt=urn:btih:FEEDBEEF&dn=Game".to_string(),
                hash: Some("feedbeef".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_relative_redirect_to_torrent_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/2"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/files/2.torrent"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/2.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(single_file_torrent()))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = PayloadResolver::new(Duration::from_secs(5)).unwrap();
        let payload = resolver.resolve(&format!("{}/dl/2", server.uri())).await.unwrap();
        match payload {
            TorrentPayload::File { bytes, hash } => {
                assert_eq!(bytes, single_file_torrent());
                assert_eq!(hash, torrent_info_hash(&single_file_torrent()).unwrap());
            }
            other => panic!("expected a torrent file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = PayloadResolver::new(Duration::from_secs(5)).unwrap();
        let result = resolver.resolve(&format!("{}/dl/3", server.uri())).await;
        assert!(matches!(result, Err(DownloaderError::ApiError(m)) if m.contains("HTTP 404")));
    }
}
