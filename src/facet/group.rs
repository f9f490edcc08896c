// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batched facet computation with optional caching.
//!
//! ```text
//! compute(query)
//!       │
//!       ├─→ cache consult (canonical key, sticky first)
//!       │        │
//!       │        └─→ Hit? fill facets, time = -1, zero backend calls
//!       │
//!       ├─→ each Facet prepares one grouped sub-query
//!       ├─→ single run_queries round-trip
//!       ├─→ i-th result → i-th facet: term resolution, rows, ordering
//!       │
//!       └─→ cache write (add-if-absent; sticky overwrite on preload)
//! ```
//!
//! Cache failures are logged and degrade to a miss on read and a no-op on
//! write; they never surface to the caller.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backend::{QueryResult, SearchBackend, SearchError};
use crate::cache::FacetGroupCache;
use crate::facet::term_source::{embedded_terms, group_id, lookup_terms, TermMap, TermSourceKind};
use crate::facet::{Facet, FacetResult};
use crate::metrics;
use crate::query::MultiFieldQuery;

/// Ordered sequence of facets computed in one backend round-trip.
///
/// The order is load-bearing: the i-th batched sub-query result maps to
/// the i-th facet, and cached result lists are stored in the same order.
#[derive(Default)]
pub struct FacetGroup {
    facets: Vec<Facet>,
    backend: Option<Box<dyn SearchBackend>>,
    cache: Option<FacetGroupCache>,
    default_index: String,
    caching: bool,
    preloading: bool,
    time: f64,
}

impl FacetGroup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_index: "*".to_string(),
            ..Self::default()
        }
    }

    pub fn attach(&mut self, facet: Facet) {
        self.facets.push(facet);
    }

    /// Backend used by standalone [`compute`](FacetGroup::compute) calls.
    /// A group driven through a `FacetedClient` shares the client's.
    pub fn set_backend(&mut self, backend: Box<dyn SearchBackend>) {
        self.backend = Some(backend);
    }

    pub fn set_cache(&mut self, cache: FacetGroupCache) {
        self.cache = Some(cache);
    }

    /// Default caching behavior when `compute` gets no explicit argument.
    pub fn set_caching(&mut self, caching: bool) {
        self.caching = caching;
    }

    /// When set, preloaded (sticky) entries are consulted even while
    /// cache writes stay disabled.
    pub fn set_preloading(&mut self, preloading: bool) {
        self.preloading = preloading;
    }

    pub fn set_default_index(&mut self, index: impl Into<String>) {
        self.default_index = index.into();
    }

    /// Aggregate backend time across facets; `-1.0` marks a cache hit.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Facet> {
        self.facets.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Facet> {
        self.facets.iter().find(|f| f.name() == name)
    }

    /// Compute every facet for `query`. `caching` overrides the configured
    /// default when given; an explicit argument also disables
    /// sticky-preload consultation.
    ///
    /// A cancelled compute leaves the group in an undefined-but-safe
    /// state; call [`reset`](FacetGroup::reset) before the next use.
    pub async fn compute(
        &mut self,
        query: &mut MultiFieldQuery,
        caching: Option<bool>,
    ) -> Result<(), SearchError> {
        let read_cache = caching.unwrap_or(self.caching || self.preloading);
        let write_cache = caching.unwrap_or(self.caching);

        if read_cache && self.load_cached(query).await {
            return Ok(());
        }
        self.compute_uncached(query).await?;
        if write_cache {
            self.store(query, false, false).await;
        }
        Ok(())
    }

    /// Compute without consulting the cache, then write the results under
    /// a sticky key so they survive ordinary cache clears.
    pub async fn preload(&mut self, query: &mut MultiFieldQuery) -> Result<(), SearchError> {
        self.compute_uncached(query).await?;
        self.store(query, true, true).await;
        Ok(())
    }

    /// [`preload`](FacetGroup::preload) against an externally owned
    /// backend.
    pub(crate) async fn preload_with(
        &mut self,
        backend: &mut dyn SearchBackend,
        query: &mut MultiFieldQuery,
    ) -> Result<(), SearchError> {
        self.compute_with(backend, query, false).await?;
        self.store(query, true, true).await;
        Ok(())
    }

    /// Zero every facet's results and the aggregate time.
    pub fn reset(&mut self) {
        for facet in &mut self.facets {
            facet.reset();
        }
        self.time = 0.0;
    }

    /// `{facet name → computed result}` as a plain JSON value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for facet in &self.facets {
            map.insert(facet.name().to_string(), facet.to_value());
        }
        Value::Object(map)
    }

    async fn compute_uncached(&mut self, query: &mut MultiFieldQuery) -> Result<(), SearchError> {
        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| SearchError::Config("facet group has no search backend".into()))?;
        let outcome = self.compute_with(backend.as_mut(), query, false).await;
        self.backend = Some(backend);
        outcome
    }

    /// Prepare, run and finalize against an externally owned backend in
    /// one self-contained batch.
    pub(crate) async fn compute_with(
        &mut self,
        backend: &mut dyn SearchBackend,
        query: &mut MultiFieldQuery,
        filtering: bool,
    ) -> Result<(), SearchError> {
        if self.facets.is_empty() {
            return Ok(());
        }
        let first = self.prepare_into(backend, query, filtering);
        let results = backend.run_queries().await?;
        let slice = results.get(first..).ok_or_else(|| {
            SearchError::Backend("backend returned fewer results than queued".into())
        })?;
        self.finalize(backend, query, slice).await
    }

    /// Queue one grouped sub-query per facet; returns the first slot.
    pub(crate) fn prepare_into(
        &self,
        backend: &mut dyn SearchBackend,
        query: &MultiFieldQuery,
        filtering: bool,
    ) -> usize {
        let mut first = 0;
        for (i, facet) in self.facets.iter().enumerate() {
            let slot = facet.prepare(backend, query, &self.default_index, filtering);
            if i == 0 {
                first = slot;
            }
        }
        debug!(facets = self.facets.len(), "facet sub-queries prepared");
        first
    }

    /// Map the i-th result onto the i-th facet: resolve terms, shape rows,
    /// order values, aggregate time. A non-empty backend error on any
    /// sub-query fails the whole computation (after landing in that
    /// facet's result for diagnostics).
    pub(crate) async fn finalize(
        &mut self,
        backend: &mut dyn SearchBackend,
        query: &mut MultiFieldQuery,
        results: &[QueryResult],
    ) -> Result<(), SearchError> {
        self.reset();
        let mut time = 0.0;
        for (i, facet) in self.facets.iter_mut().enumerate() {
            let raw = results.get(i).ok_or_else(|| {
                SearchError::Backend(format!(
                    "missing sub-query result for facet '{}'",
                    facet.name()
                ))
            })?;
            if let Some(error) = raw.error_text() {
                facet.set_results(FacetResult {
                    time: raw.time,
                    total_found: raw.total_found,
                    error: raw.error.clone(),
                    warning: raw.warning.clone(),
                    matches: Vec::new(),
                });
                return Err(SearchError::Backend(format!(
                    "facet '{}': {error}",
                    facet.name()
                )));
            }

            let terms = match facet.source_config() {
                Some(cfg) => match cfg.kind {
                    TermSourceKind::Attr => embedded_terms(&raw.matches, &cfg),
                    TermSourceKind::Index => {
                        lookup_terms(backend, &raw.matches, &cfg, &group_id).await?
                    }
                },
                None => TermMap::new(),
            };
            facet.set_values(query, raw, &terms);
            facet.order_values();
            metrics::record_facet_rows(facet.name(), facet.len());
            time += raw.time;
        }
        self.time = time;
        Ok(())
    }

    /// Consult the cache if configured to; fills the facets and marks the
    /// hit on success.
    pub(crate) async fn try_cache(&mut self, query: &MultiFieldQuery) -> bool {
        if self.cache.is_some() && (self.caching || self.preloading) {
            self.load_cached(query).await
        } else {
            false
        }
    }

    /// Add-if-absent cache write under the default caching policy.
    pub(crate) async fn store_default(&mut self, query: &MultiFieldQuery) {
        if self.caching {
            self.store(query, false, false).await;
        }
    }

    async fn load_cached(&mut self, query: &MultiFieldQuery) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let canonical = query.to_canonical();
        match cache.get_facets(&canonical).await {
            Ok(Some(slots)) if slots.len() == self.facets.len() => {
                for (facet, results) in self.facets.iter_mut().zip(slots) {
                    facet.set_results(results);
                }
                self.time = -1.0;
                metrics::record_facet_cache(true);
                debug!(canonical = %canonical, "facet cache hit");
                true
            }
            Ok(Some(slots)) => {
                warn!(
                    canonical = %canonical,
                    stored = slots.len(),
                    facets = self.facets.len(),
                    "facet cache entry has mismatched slot count, ignoring"
                );
                metrics::record_facet_cache(false);
                false
            }
            Ok(None) => {
                metrics::record_facet_cache(false);
                false
            }
            Err(error) => {
                warn!(error = %error, "facet cache read failed, treating as miss");
                metrics::record_facet_cache(false);
                false
            }
        }
    }

    async fn store(&self, query: &MultiFieldQuery, overwrite: bool, sticky: bool) {
        let Some(cache) = &self.cache else {
            return;
        };
        let results: Vec<FacetResult> =
            self.facets.iter().map(|f| f.results().clone()).collect();
        if let Err(error) = cache
            .set_facets(&query.to_canonical(), &results, overwrite, sticky)
            .await
        {
            warn!(error = %error, "facet cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Match, StubBackend};
    use crate::cache::InMemoryStore;
    use crate::facet::Order;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn movie_query(input: &str) -> MultiFieldQuery {
        let mut q = MultiFieldQuery::new(HashMap::new(), HashMap::new());
        q.parse(input);
        q
    }

    fn grouped(id: i64, count: i64) -> Match {
        Match {
            doc_id: id as u64,
            weight: 1,
            attrs: BTreeMap::from([
                ("@groupby".to_string(), json!(id)),
                ("@count".to_string(), json!(count)),
            ]),
        }
    }

    fn grouped_result(time: f64, rows: Vec<Match>) -> QueryResult {
        QueryResult {
            time,
            total_found: rows.len() as u64,
            matches: rows,
            ..QueryResult::default()
        }
    }

    fn two_facet_group(backend: StubBackend) -> FacetGroup {
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        group.attach(Facet::new("genre").order_by("@groupby", Order::Asc));
        group.set_backend(Box::new(backend));
        group
    }

    #[tokio::test]
    async fn test_compute_batches_one_query_per_facet() {
        let mut backend = StubBackend::new();
        backend.push_response(vec![
            grouped_result(0.002, vec![grouped(1974, 9), grouped(1999, 4)]),
            grouped_result(0.003, vec![grouped(3, 2), grouped(1, 5)]),
        ]);
        let mut group = two_facet_group(backend);
        let mut query = movie_query("@year 1974");

        group.compute(&mut query, None).await.unwrap();

        assert!((group.time() - 0.005).abs() < 1e-9);
        assert_eq!(group.get("year").unwrap().len(), 2);
        // genre ordered by @groupby ascending.
        let ids: Vec<i64> = group
            .get("genre")
            .unwrap()
            .iter()
            .map(|row| row.get("@groupby").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_compute_without_backend_is_config_error() {
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        let mut query = movie_query("@year 1974");
        let err = group.compute(&mut query, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[tokio::test]
    async fn test_facet_error_fails_compute_with_diagnostics() {
        let mut backend = StubBackend::new();
        backend.push_response(vec![
            grouped_result(0.001, vec![grouped(1974, 1)]),
            QueryResult {
                error: Some("index 'genres' missing".to_string()),
                ..QueryResult::default()
            },
        ]);
        let mut group = two_facet_group(backend);
        let mut query = movie_query("@year 1974");

        let err = group.compute(&mut query, None).await.unwrap_err();
        assert!(err.to_string().contains("genre"));
        assert_eq!(
            group.get("genre").unwrap().results().error.as_deref(),
            Some("index 'genres' missing")
        );
    }

    #[tokio::test]
    async fn test_cache_round_trip_marks_hit() {
        let store = Arc::new(InMemoryStore::new());

        let mut backend = StubBackend::new();
        backend.push_response(vec![
            grouped_result(0.002, vec![grouped(1974, 9)]),
            grouped_result(0.001, vec![grouped(1, 5)]),
        ]);
        let mut group = two_facet_group(backend);
        group.set_cache(FacetGroupCache::new(store.clone(), "test_"));
        group.set_caching(true);

        let mut query = movie_query("@year 1974");
        group.compute(&mut query, None).await.unwrap();
        assert!(group.time() > 0.0);
        let first_rows = group.get("year").unwrap().results().clone();

        // Second compute: no scripted response needed, zero backend calls.
        let mut group2 = two_facet_group(StubBackend::new());
        group2.set_cache(FacetGroupCache::new(store, "test_"));
        group2.set_caching(true);
        let mut query2 = movie_query("@year 1974");
        group2.compute(&mut query2, None).await.unwrap();
        assert_eq!(group2.time(), -1.0);
        assert_eq!(group2.get("year").unwrap().results(), &first_rows);
    }

    #[tokio::test]
    async fn test_explicit_caching_false_skips_cache() {
        let store = Arc::new(InMemoryStore::new());
        let mut backend = StubBackend::new();
        backend.push_response(vec![grouped_result(0.002, vec![grouped(1974, 9)])]);
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        group.set_backend(Box::new(backend));
        group.set_cache(FacetGroupCache::new(store.clone(), "test_"));
        group.set_caching(true);

        let mut query = movie_query("@year 1974");
        group.compute(&mut query, Some(false)).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_preload_survives_ordinary_clear() {
        let store = Arc::new(InMemoryStore::new());
        let mut backend = StubBackend::new();
        backend.push_response(vec![grouped_result(0.002, vec![grouped(1974, 9)])]);
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        group.set_backend(Box::new(backend));
        group.set_cache(FacetGroupCache::new(store.clone(), "test_"));
        group.set_preloading(true);

        let mut query = movie_query("@year 1974");
        group.preload(&mut query).await.unwrap();

        let cache = FacetGroupCache::new(store.clone(), "test_");
        cache.clear(false).await.unwrap();
        assert!(cache
            .get_facets(&query.to_canonical())
            .await
            .unwrap()
            .is_some());

        // Preloading alone reads the sticky entry without re-computing.
        let mut group2 = FacetGroup::new();
        group2.attach(Facet::new("year"));
        group2.set_backend(Box::new(StubBackend::new()));
        group2.set_cache(FacetGroupCache::new(store, "test_"));
        group2.set_preloading(true);
        let mut query2 = movie_query("@year 1974");
        group2.compute(&mut query2, None).await.unwrap();
        assert_eq!(group2.time(), -1.0);
    }

    #[tokio::test]
    async fn test_reset_zeroes_everything() {
        let mut backend = StubBackend::new();
        backend.push_response(vec![grouped_result(0.002, vec![grouped(1974, 9)])]);
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        group.set_backend(Box::new(backend));
        let mut query = movie_query("@year 1974");
        group.compute(&mut query, None).await.unwrap();
        assert!(!group.get("year").unwrap().is_empty());

        group.reset();
        assert_eq!(group.time(), 0.0);
        assert!(group.get("year").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_to_value_keys_by_facet_name() {
        let mut group = FacetGroup::new();
        group.attach(Facet::new("year"));
        group.attach(Facet::new("genre"));
        let value = group.to_value();
        assert!(value.get("year").is_some());
        assert!(value.get("genre").is_some());
    }
}
