//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Search aggregation (searches, duration, indexer failures)
//! - Download dispatch (outcomes, per-client attempt failures)

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts};

// =============================================================================
// Search Metrics
// =============================================================================

/// Aggregated searches by result.
pub static SEARCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gamearr_searches_total", "Total aggregated searches"),
        &["result"], // "ok", "partial", "unconfigured"
    )
    .unwrap()
});

/// Aggregated search duration in seconds.
pub static SEARCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "gamearr_search_duration_seconds",
            "Duration of an aggregated search across all indexers",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
    )
    .unwrap()
});

/// Indexer failures by protocol.
pub static INDEXER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gamearr_indexer_failures_total", "Indexer requests that failed"),
        &["protocol"], // "torznab", "newznab"
    )
    .unwrap()
});

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Add-download dispatches by outcome.
pub static DISPATCH_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gamearr_dispatch_outcomes_total",
            "Add-download dispatches by outcome",
        ),
        &["result"], // "accepted", "failed", "unconfigured"
    )
    .unwrap()
});

/// Failed add attempts by downloader type (each one triggers a fallback).
pub static DOWNLOADER_ATTEMPT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gamearr_downloader_attempt_failures_total",
            "Add-download attempts rejected or failed by a downloader",
        ),
        &["type"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Search
        Box::new(SEARCHES_TOTAL.clone()),
        Box::new(SEARCH_DURATION.clone()),
        Box::new(INDEXER_FAILURES.clone()),
        // Dispatch
        Box::new(DISPATCH_OUTCOMES.clone()),
        Box::new(DOWNLOADER_ATTEMPT_FAILURES.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for collector in all_metrics() {
            registry.register(collector).unwrap();
        }
        SEARCHES_TOTAL.with_label_values(&["ok"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "gamearr_searches_total"));
    }
}
