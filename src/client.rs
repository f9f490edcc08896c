//! The faceted search front door.
//!
//! A [`FacetedClient`] parses user queries, runs the main query and every
//! facet sub-query in a single backend batch, and assembles the response:
//!
//! ```text
//! query("@year 1974 drama")
//!       │
//!       ├─→ parse → MultiFieldQuery
//!       ├─→ numeric terms → attribute filters   (when filtering)
//!       ├─→ slot 0: main query
//!       ├─→ facet cache consult (hit ⇒ facets skip the batch)
//!       ├─→ slots 1..: one grouped sub-query per facet
//!       ├─→ run_queries (one round-trip)
//!       └─→ SearchResults { matches, total_found, time, facets }
//! ```
//!
//! The client is single-threaded by contract: the wrapped backend holds
//! mutable query state that is saved and restored around sub-operations,
//! so concurrent callers would corrupt each other's sub-queries. Pool one
//! client per task when parallelism is needed.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{Match, SearchBackend, SearchError};
use crate::cache::{FacetGroupCache, KvStore};
use crate::config::SearchConfig;
use crate::facet::{
    lookup_terms, Facet, FacetGroup, FacetResult, IdGetter, TermMap, TermSource, TermSourceConfig,
};
use crate::metrics;
use crate::query::MultiFieldQuery;

/// The assembled response of one search call.
#[derive(Debug, Clone)]
pub struct SearchResults {
    /// User-facing rendering of the parsed query, with resolved display
    /// terms where a term source provided them.
    pub query: String,
    pub total_found: u64,
    pub time: f64,
    pub warning: Option<String>,
    pub matches: Vec<Match>,
    /// Computed facet results in facet order.
    pub facets: Vec<(String, FacetResult)>,
}

pub struct FacetedClient<B: SearchBackend> {
    backend: B,
    query_proto: MultiFieldQuery,
    facets: FacetGroup,
    default_index: String,
    filtering: bool,
    env: String,
}

impl<B: SearchBackend> FacetedClient<B> {
    pub fn new(backend: B, config: SearchConfig) -> Self {
        let mut query_proto =
            MultiFieldQuery::new(config.user_sph_map.clone(), config.user_attr_map.clone());
        query_proto.set_allow_empty(config.allow_empty);

        let mut facets = FacetGroup::new();
        facets.set_default_index(config.index.clone());
        facets.set_caching(config.caching);
        facets.set_preloading(config.preloading);
        for facet_config in &config.facets {
            facets.attach(Facet::from(facet_config));
        }

        Self {
            backend,
            query_proto,
            facets,
            default_index: config.index,
            filtering: config.filtering,
            env: config.env,
        }
    }

    /// Attach another facet; its sub-query joins every subsequent search.
    pub fn attach(&mut self, facet: Facet) {
        self.facets.attach(facet);
    }

    /// Attach a cache store; facet results are cached per canonical query
    /// under this client's env prefix.
    pub fn attach_cache(&mut self, store: Arc<dyn KvStore>) {
        self.facets
            .set_cache(FacetGroupCache::new(store, self.env.clone()));
    }

    pub fn set_filtering(&mut self, filtering: bool) {
        self.filtering = filtering;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn facets(&self) -> &FacetGroup {
        &self.facets
    }

    pub fn facets_mut(&mut self) -> &mut FacetGroup {
        &mut self.facets
    }

    /// Parse a query without running it, e.g. for toggling terms before
    /// [`run_query`](FacetedClient::run_query).
    pub fn parse(&self, input: &str) -> MultiFieldQuery {
        let mut query = self.query_proto.clone();
        query.parse(input);
        query
    }

    /// Parse and run a search.
    pub async fn query(&mut self, input: &str) -> Result<SearchResults, SearchError> {
        let query = self.parse(input);
        self.run_query(query).await
    }

    /// Compute the facets for `input` without consulting the cache and
    /// write them under a sticky key, so they survive ordinary cache
    /// flushes. The main query does not run.
    pub async fn preload(&mut self, input: &str) -> Result<(), SearchError> {
        let mut query = self.parse(input);
        self.facets
            .preload_with(&mut self.backend, &mut query)
            .await
    }

    /// Run a search for an already parsed query. The main query is slot 0
    /// of a single batch; facet sub-queries fill the following slots
    /// unless the facet cache answers first. A main query with zero hits
    /// resets the facets instead of computing them.
    pub async fn run_query(
        &mut self,
        mut query: MultiFieldQuery,
    ) -> Result<SearchResults, SearchError> {
        let started = Instant::now();
        let saved = self.backend.snapshot();

        if self.filtering {
            for term in query.iter().filter(|t| t.is_active() && t.is_numeric()) {
                if let Ok(value) = term.term.parse::<i64>() {
                    self.backend.set_filter(&term.attribute, vec![value], false);
                }
            }
        }

        let main_text = query.to_sphinx(self.filtering);
        let main_slot = self.backend.add_query(&main_text, &self.default_index, "");
        debug!(index = %self.default_index, query = %main_text, "main query queued");

        let have_facets = !self.facets.is_empty();
        let cached = if have_facets {
            self.facets.try_cache(&query).await
        } else {
            false
        };
        if have_facets && !cached {
            self.facets
                .prepare_into(&mut self.backend, &query, self.filtering);
            metrics::record_batch_size(1 + self.facets.len());
        } else {
            metrics::record_batch_size(1);
        }

        let outcome = self.backend.run_queries().await;
        self.backend.restore(saved);
        let results = match outcome {
            Ok(results) => results,
            Err(error) => {
                metrics::record_query("error");
                return Err(error);
            }
        };

        let main = results
            .get(main_slot)
            .cloned()
            .ok_or_else(|| SearchError::Backend("missing main query result".into()))?;
        if let Some(error) = main.error_text() {
            metrics::record_query("error");
            return Err(SearchError::Backend(error.to_string()));
        }

        if have_facets && !cached {
            if main.total_found == 0 {
                self.facets.reset();
            } else {
                let facet_results = &results[main_slot + 1..];
                self.facets
                    .finalize(&mut self.backend, &mut query, facet_results)
                    .await?;
                self.facets.store_default(&query).await;
            }
        }

        metrics::record_query("success");
        metrics::record_query_latency(started.elapsed());
        Ok(SearchResults {
            query: query.to_string(),
            total_found: main.total_found,
            time: main.time,
            warning: main.warning,
            matches: main.matches,
            facets: self
                .facets
                .iter()
                .map(|f| (f.name().to_string(), f.results().clone()))
                .collect(),
        })
    }
}

/// Lookup-index term source: resolve ids with one filtered full-scan
/// query through this client's backend.
#[async_trait]
impl<B: SearchBackend> TermSource for FacetedClient<B> {
    async fn fetch_terms(
        &mut self,
        matches: &[Match],
        cfg: &TermSourceConfig,
        id_of: &IdGetter,
    ) -> Result<TermMap, SearchError> {
        lookup_terms(&mut self.backend, matches, cfg, id_of).await
    }
}
