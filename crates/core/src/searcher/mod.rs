//! Indexer search.
//!
//! One `ProtocolSearcher` per protocol family (Torznab for torrents,
//! Newznab for usenet) and a `SearchAggregator` that fans a query out to
//! every enabled indexer and merges the results into one list.

mod aggregator;
pub mod feed;
mod newznab;
mod request;
mod torznab;
mod types;

pub use aggregator::{normalize, sort_by_pub_date, SearchAggregator, NO_INDEXERS_CONFIGURED};
pub use newznab::NewznabClient;
pub use request::build_search_url;
pub use torznab::{btih_from_magnet, TorznabClient};
pub use types::*;
