//! Cross-protocol search aggregation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::newznab::NewznabClient;
use super::torznab::TorznabClient;
use super::{
    AggregatedSearchResults, DownloadType, FamilySearchResult, Indexer, IndexerProtocol,
    ProtocolSearcher, RawSearchItem, SearchError, SearchItem, SearchParams, SearchPayload,
};
use crate::metrics;
use crate::store::ConfigStore;

pub const NO_INDEXERS_CONFIGURED: &str = "No indexers configured";

/// Fans a search out to every enabled indexer and merges the results.
///
/// The two protocol families run concurrently with each other, and each
/// family fans out to its indexers concurrently. Every branch is bounded by
/// `timeout`.
pub struct SearchAggregator {
    torznab: Arc<dyn ProtocolSearcher>,
    newznab: Arc<dyn ProtocolSearcher>,
    timeout: Duration,
}

impl SearchAggregator {
    pub fn new(
        torznab: Arc<dyn ProtocolSearcher>,
        newznab: Arc<dyn ProtocolSearcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            torznab,
            newznab,
            timeout,
        }
    }

    /// Aggregator backed by the real Torznab and Newznab HTTP clients.
    pub fn with_native_clients(timeout: Duration) -> Result<Self, SearchError> {
        Ok(Self::new(
            Arc::new(TorznabClient::new(timeout)?),
            Arc::new(NewznabClient::new(timeout)?),
            timeout,
        ))
    }

    /// Search every enabled indexer known to `store`.
    pub async fn search_all_indexers(
        &self,
        store: &dyn ConfigStore,
        params: &SearchParams,
    ) -> AggregatedSearchResults {
        match store.get_enabled_indexers().await {
            Ok(indexers) => self.search(&indexers, params).await,
            Err(e) => {
                warn!(error = %e, "Failed to load indexers");
                AggregatedSearchResults {
                    offset: params.offset,
                    errors: vec![SearchError::Store(e.to_string()).to_string()],
                    ..Default::default()
                }
            }
        }
    }

    /// Search the given indexers. Never fails; per-indexer failures end up
    /// in `errors`.
    pub async fn search(
        &self,
        indexers: &[Indexer],
        params: &SearchParams,
    ) -> AggregatedSearchResults {
        if indexers.is_empty() {
            metrics::SEARCHES_TOTAL
                .with_label_values(&["unconfigured"])
                .inc();
            return AggregatedSearchResults {
                items: Vec::new(),
                total: 0,
                offset: params.offset,
                errors: vec![NO_INDEXERS_CONFIGURED.to_string()],
            };
        }

        let start = Instant::now();
        let (torrent_indexers, usenet_indexers): (Vec<Indexer>, Vec<Indexer>) = indexers
            .iter()
            .cloned()
            .partition(|i| i.protocol == IndexerProtocol::Torznab);

        let (torrent, usenet) = tokio::join!(
            self.search_family(&*self.torznab, &torrent_indexers, params),
            self.search_family(&*self.newznab, &usenet_indexers, params),
        );

        let now = Utc::now();
        let mut results = AggregatedSearchResults {
            offset: params.offset,
            ..Default::default()
        };
        let families = [
            (torrent, DownloadType::Torrent),
            (usenet, DownloadType::Usenet),
        ];
        for (family, download_type) in families {
            results.total += family.total;
            results.errors.extend(family.errors);
            for indexer_result in family.results {
                results.items.extend(indexer_result.items.into_iter().map(|raw| {
                    normalize(
                        raw,
                        &indexer_result.indexer_id,
                        &indexer_result.indexer_name,
                        download_type,
                        now,
                    )
                }));
            }
        }

        sort_by_pub_date(&mut results.items);

        let outcome = if results.errors.is_empty() { "ok" } else { "partial" };
        metrics::SEARCHES_TOTAL.with_label_values(&[outcome]).inc();
        metrics::SEARCH_DURATION.observe(start.elapsed().as_secs_f64());

        info!(
            query = %params.query,
            indexers = indexers.len(),
            items = results.items.len(),
            errors = results.errors.len(),
            "Search complete"
        );

        results
    }

    async fn search_family(
        &self,
        searcher: &dyn ProtocolSearcher,
        indexers: &[Indexer],
        params: &SearchParams,
    ) -> FamilySearchResult {
        if indexers.is_empty() {
            return FamilySearchResult::default();
        }
        let family = searcher.search_multiple(indexers, params, self.timeout).await;
        if !family.errors.is_empty() {
            metrics::INDEXER_FAILURES
                .with_label_values(&[searcher.protocol().as_str()])
                .inc_by(family.errors.len() as u64);
        }
        family
    }
}

/// Convert a raw feed item into the unified shape. `download_type` comes
/// from the family that produced the item, never from its fields.
pub fn normalize(
    raw: RawSearchItem,
    indexer_id: &str,
    indexer_name: &str,
    download_type: DownloadType,
    now: DateTime<Utc>,
) -> SearchItem {
    let payload = match download_type {
        DownloadType::Torrent => {
            let seeders = raw.seeders.unwrap_or(0);
            SearchPayload::Torrent {
                seeders,
                leechers: raw.peers.unwrap_or(0).saturating_sub(seeders),
                info_hash: raw.info_hash,
                magnet_url: raw.magnet_url,
            }
        }
        DownloadType::Usenet => SearchPayload::Usenet {
            grabs: raw.grabs,
            age: raw
                .usenet_date
                .or(raw.pub_date)
                .map(|posted| (now - posted).num_days().max(0) as u32),
            poster: raw.poster,
            group: raw.group,
        },
    };

    SearchItem {
        guid: raw
            .guid
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| raw.link.clone()),
        title: raw.title,
        link: raw.link,
        pub_date: raw.pub_date,
        size: raw.size,
        indexer_id: indexer_id.to_string(),
        indexer_name: indexer_name.to_string(),
        categories: raw.categories,
        comments: raw.comments,
        payload,
    }
}

/// Newest first; items without a date go last. Stable.
pub fn sort_by_pub_date(items: &mut [SearchItem]) {
    items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
}
