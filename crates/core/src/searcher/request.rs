//! HTTP plumbing shared by the Torznab and Newznab clients.

use reqwest::Client;
use tracing::debug;

use super::feed::{details_url, parse_feed};
use super::{Indexer, IndexerSearchResult, SearchError, SearchParams};

/// Build the `t=search` URL for one indexer.
///
/// `categories` is the already-intersected category list; empty means the
/// `cat` parameter is omitted.
pub fn build_search_url(indexer: &Indexer, params: &SearchParams, categories: &[String]) -> String {
    let base = indexer.url.trim_end_matches('/');
    let endpoint = if base.ends_with("/api") {
        base.to_string()
    } else {
        format!("{}/api", base)
    };

    let mut url = format!(
        "{}?t=search&extended=1&apikey={}&q={}&limit={}&offset={}",
        endpoint,
        urlencoding::encode(&indexer.api_key),
        urlencoding::encode(&params.query),
        params.limit,
        params.offset
    );

    if !categories.is_empty() {
        url.push_str(&format!("&cat={}", categories.join(",")));
    }

    url
}

/// Fetch and parse one indexer's feed.
///
/// Items are returned in feed order. Missing `<comments>` links are filled
/// with the `/details/{guid}` heuristic when it can be derived.
pub async fn fetch_feed(
    client: &Client,
    indexer: &Indexer,
    params: &SearchParams,
    categories: &[String],
) -> Result<IndexerSearchResult, SearchError> {
    let url = build_search_url(indexer, params, categories);
    debug!(indexer = %indexer.name, protocol = indexer.protocol.as_str(), "Searching indexer");

    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SearchError::HttpStatus {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }

    let body = response.text().await?;
    let feed = parse_feed(&body)?;

    let mut items = feed.items;
    for item in items.iter_mut() {
        if item.comments.is_none() {
            let guid = item.guid.as_deref().unwrap_or(&item.link);
            item.comments = details_url(&indexer.url, guid);
        }
    }

    let total = feed.total.unwrap_or(items.len() as u64);

    Ok(IndexerSearchResult {
        indexer_id: indexer.id.clone(),
        indexer_name: indexer.name.clone(),
        items,
        total,
    })
}

/// An empty contribution for an indexer whose categories exclude the request.
pub fn empty_result(indexer: &Indexer) -> IndexerSearchResult {
    IndexerSearchResult {
        indexer_id: indexer.id.clone(),
        indexer_name: indexer.name.clone(),
        items: Vec::new(),
        total: 0,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::searcher::{IndexerProtocol, NewznabClient, ProtocolSearcher, TorznabClient};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Foo Bar 1</title>
      <guid>abc123</guid>
      <link>http://tracker.test/download/1.torrent</link>
      <torznab:attr name="seeders" value="3"/>
    </item>
  </channel>
</rss>"#;

    fn indexer(url: &str) -> Indexer {
        Indexer {
            id: "idx".to_string(),
            name: "Test".to_string(),
            url: url.to_string(),
            api_key: "key with space".to_string(),
            protocol: IndexerProtocol::Torznab,
            enabled: true,
            priority: 1,
            categories: vec![],
            rss_enabled: true,
            auto_search_enabled: true,
        }
    }

    #[test]
    fn test_build_search_url() {
        let params = SearchParams::new("foo bar").with_limit(25).with_offset(50);
        let url = build_search_url(&indexer("http://localhost:9117/"), &params, &[]);
        assert!(url.starts_with("http://localhost:9117/api?t=search"));
        assert!(url.contains("apikey=key%20with%20space"));
        assert!(url.contains("q=foo%20bar"));
        assert!(url.contains("limit=25"));
        assert!(url.contains("offset=50"));
        assert!(!url.contains("cat="));
    }

    #[test]
    fn test_build_search_url_existing_api_suffix() {
        let params = SearchParams::new("x");
        let url = build_search_url(
            &indexer("http://jackett:9117/api/v2.0/indexers/all/results/torznab/api"),
            &params,
            &["4000".to_string(), "4050".to_string()],
        );
        assert!(url.starts_with("http://jackett:9117/api/v2.0/indexers/all/results/torznab/api?"));
        assert!(!url.contains("/api/api"));
        assert!(url.contains("&cat=4000,4050"));
    }

    #[tokio::test]
    async fn test_fetch_feed_fills_details_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("t", "search"))
            .and(query_param("q", "foo bar"))
            .and(query_param("apikey", "key with space"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_feed(
            &Client::new(),
            &indexer(&server.uri()),
            &SearchParams::new("foo bar"),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(result.indexer_name, "Test");
        assert_eq!(result.total, 1);
        assert_eq!(result.items[0].title, "Foo Bar 1");
        assert_eq!(
            result.items[0].comments.as_deref(),
            Some(format!("{}/details/abc123", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_failed_indexer_is_reported_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken/api"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad apikey"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/good/api"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let mut broken = indexer(&format!("{}/broken", server.uri()));
        broken.id = "broken".to_string();
        broken.name = "Broken".to_string();
        let mut good = indexer(&format!("{}/good", server.uri()));
        good.id = "good".to_string();
        good.name = "Good".to_string();

        let client = TorznabClient::new(Duration::from_secs(5)).unwrap();
        let family = client
            .search_multiple(&[broken, good], &SearchParams::new("foo"), Duration::from_secs(5))
            .await;
        assert_eq!(family.errors, vec!["Broken: HTTP 401: bad apikey".to_string()]);
        assert_eq!(family.results.len(), 1);
        assert_eq!(family.results[0].indexer_name, "Good");
        assert_eq!(family.total, 1);
    }

    #[tokio::test]
    async fn test_newznab_failure_is_reported_by_name() {
        // Nothing mounted: every request gets a 404.
        let server = MockServer::start().await;

        let mut missing = indexer(&server.uri());
        missing.protocol = IndexerProtocol::Newznab;
        missing.name = "Missing".to_string();

        let client = NewznabClient::new(Duration::from_secs(5)).unwrap();
        let family = client
            .search_multiple(&[missing], &SearchParams::new("foo"), Duration::from_secs(5))
            .await;
        assert!(family.results.is_empty());
        assert_eq!(family.errors.len(), 1);
        assert!(family.errors[0].starts_with("Missing: HTTP 404"));
    }
}
