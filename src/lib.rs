//! # sphinx-facets
//!
//! Faceted-search middleware that sits in front of a Sphinx-compatible
//! full-text engine. It augments raw keyword search with a structured,
//! user-facing query language and a facet-computation pipeline that issues
//! a batched set of grouped sub-queries per search, with optional term
//! resolution and a pluggable result cache.
//!
//! ## Architecture
//!
//! ```text
//! user query string
//!       │
//!       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MultiFieldQuery                         │
//! │  • "@year 1974 @genre drama" → ordered QueryTerms           │
//! │  • emits backend query string + canonical cache key         │
//! └─────────────────────────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FacetedClient                          │
//! │  • main query enqueued (numeric terms → attribute filters)  │
//! │  • each Facet enqueues one grouped sub-query                │
//! │  • single RunQueries round-trip, slot 0 = main              │
//! └─────────────────────────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  FacetGroup / FacetGroupCache               │
//! │  • i-th sub-query result → i-th Facet                       │
//! │  • id → display-term resolution via TermSource              │
//! │  • per-canonical-query caching with sticky preload keys     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sphinx_facets::{Facet, FacetedClient, SearchConfig, StubBackend};
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), sphinx_facets::SearchError> {
//! let config = SearchConfig {
//!     index: "movies".into(),
//!     user_sph_map: HashMap::from([("actor".into(), "actors".into())]),
//!     ..Default::default()
//! };
//!
//! let mut client = FacetedClient::new(StubBackend::new(), config);
//! client.attach(Facet::new("actor").max_num_values(10));
//! client.attach(Facet::new("year"));
//!
//! let results = client.query("@actor harrison ford @year 1974").await?;
//! println!("{} hits, {} facets", results.total_found, results.facets.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`query`]: query terms and the multi-field query language
//! - [`backend`]: the abstract [`SearchBackend`] contract and a scripted stub
//! - [`facet`]: facets, facet groups and term-resolution strategies
//! - [`cache`]: the facet result cache and its key/value adapters
//! - [`client`]: the [`FacetedClient`] front door
//! - [`config`]: plain configuration records
//!
//! A `FacetedClient` is single-threaded by contract: the wrapped backend
//! holds mutable query state that is saved and restored around every
//! sub-operation. Callers that need parallelism pool one client per task.

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod facet;
pub mod metrics;
pub mod query;
pub mod retry;

pub use backend::{
    GroupFunc, Match, MatchMode, QueryResult, QueryState, SearchBackend, SearchError, SortMode,
    StubBackend,
};
pub use cache::{
    CacheError, CacheStats, FacetGroupCache, InMemoryStore, KvStore, MemcachedStore, RedisStore,
};
pub use client::{FacetedClient, SearchResults};
pub use config::{FacetConfig, SearchConfig};
pub use facet::{
    Facet, FacetGroup, FacetResult, FacetRow, Order, TermMap, TermSource, TermSourceConfig,
    TermSourceKind,
};
pub use query::{MultiFieldQuery, QueryTerm, TermStatus, ToggleState};
pub use retry::RetryConfig;
