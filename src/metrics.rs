//! Metrics instrumentation.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! application chooses the exporter.
//!
//! # Metric Naming Convention
//! - `sphinx_facets_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use std::time::Duration;

use metrics::{counter, histogram};

/// Record the outcome of a search call.
pub fn record_query(status: &str) {
    counter!(
        "sphinx_facets_queries_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record end-to-end search latency.
pub fn record_query_latency(duration: Duration) {
    histogram!("sphinx_facets_query_seconds").record(duration.as_secs_f64());
}

/// Record a facet-cache lookup outcome.
pub fn record_facet_cache(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "sphinx_facets_cache_lookups_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the number of sub-queries in one backend batch.
pub fn record_batch_size(count: usize) {
    histogram!("sphinx_facets_batch_size").record(count as f64);
}

/// Record the computed row count for a facet.
pub fn record_facet_rows(facet: &str, count: usize) {
    histogram!(
        "sphinx_facets_facet_rows",
        "facet" => facet.to_string()
    )
    .record(count as f64);
}
