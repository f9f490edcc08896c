//! Facet result cache.
//!
//! Caches the per-canonical-query list of facet results, one blob per
//! query, behind an abstract [`KvStore`]:
//!
//! ```text
//! key regime
//!   normal  FSPHINX_<env><md5(canonical)>
//!   sticky  FSPHINX_!<env><md5(canonical)>
//! ```
//!
//! The `FSPHINX_` namespace isolates the cache from unrelated keys on a
//! shared store; the `env` prefix isolates deployments (and test runs)
//! from each other. Sticky entries survive an ordinary clear and are used
//! to keep preloaded results across cache flushes — only an explicit
//! sticky clear evicts them.
//!
//! Values are length-prefixed serialized facet results, one per facet in
//! the owning group's order, so a read that spans a sticky rotation can
//! still be consumed entry by entry.

mod memcached;
mod memory;
mod redis;

pub use memcached::MemcachedStore;
pub use memory::InMemoryStore;
pub use redis::RedisStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::facet::FacetResult;
use crate::query::md5_hex;

/// Namespace prefix applied by every adapter.
pub const NAMESPACE: &str = "FSPHINX_";

/// Marker prepended to keys exempt from ordinary clears.
pub const STICKY_MARKER: &str = "!";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connect(String),
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An abstract key-value store holding cache entries.
///
/// Keys arrive without the [`NAMESPACE`] prefix (adapters apply it) but
/// with the sticky marker already in place; the separate `sticky` flag on
/// [`set`](KvStore::set) lets adapters that cannot enumerate keys route
/// sticky entries around their invalidation scheme.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value. With `overwrite` false the write is add-if-absent;
    /// the return value reports whether anything was written.
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        sticky: bool,
    ) -> Result<bool, CacheError>;

    /// Remove every entry under `prefix`; sticky entries only when
    /// `also_sticky`. Returns the number of evicted entries where the
    /// store can count them.
    async fn clear(&self, prefix: &str, also_sticky: bool) -> Result<u64, CacheError>;
}

/// Whether a key (already stripped of [`NAMESPACE`]) falls to a clear of
/// `prefix`. Branches on the sticky marker first: with an empty env
/// prefix a bare `starts_with` would sweep sticky keys too.
pub(crate) fn clear_match(rest: &str, prefix: &str, also_sticky: bool) -> bool {
    match rest.strip_prefix(STICKY_MARKER) {
        Some(sticky_rest) => also_sticky && sticky_rest.starts_with(prefix),
        None => rest.starts_with(prefix),
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits answered by a sticky (preloaded) entry.
    pub sticky_hits: u64,
    /// Hit rate (0.0 - 1.0).
    pub hit_rate: f64,
}

/// Per-canonical-query cache of facet result lists.
///
/// The store may be shared across clients; entries are self-contained so
/// no cross-key transaction is needed.
#[derive(Clone)]
pub struct FacetGroupCache {
    store: Arc<dyn KvStore>,
    env: String,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sticky_hits: Arc<AtomicU64>,
}

impl FacetGroupCache {
    /// `env` is the deployment prefix baked into every key; make it
    /// explicit configuration, not a process-wide global.
    pub fn new(store: Arc<dyn KvStore>, env: impl Into<String>) -> Self {
        Self {
            store,
            env: env.into(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sticky_hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            sticky_hits: self.sticky_hits.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    fn normal_key(&self, canonical: &str) -> String {
        format!("{}{}", self.env, md5_hex(canonical))
    }

    fn sticky_key(&self, canonical: &str) -> String {
        format!("{STICKY_MARKER}{}", self.normal_key(canonical))
    }

    /// Look up the facet results for a canonical query, sticky key first.
    pub async fn get_facets(
        &self,
        canonical: &str,
    ) -> Result<Option<Vec<FacetResult>>, CacheError> {
        for (sticky, key) in [
            (true, self.sticky_key(canonical)),
            (false, self.normal_key(canonical)),
        ] {
            if let Some(bytes) = self.store.get(&key).await? {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if sticky {
                    self.sticky_hits.fetch_add(1, Ordering::Relaxed);
                }
                return decode_results(&bytes).map(Some);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store the facet results for a canonical query, in facet order.
    /// Returns whether the entry was written (add-if-absent may decline).
    pub async fn set_facets(
        &self,
        canonical: &str,
        results: &[FacetResult],
        overwrite: bool,
        sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = if sticky {
            self.sticky_key(canonical)
        } else {
            self.normal_key(canonical)
        };
        let bytes = encode_results(results)?;
        self.store.set(&key, &bytes, overwrite, sticky).await
    }

    /// Evict every entry under this cache's env prefix; sticky entries
    /// only when `clear_sticky`.
    pub async fn clear(&self, clear_sticky: bool) -> Result<u64, CacheError> {
        self.store.clear(&self.env, clear_sticky).await
    }
}

fn encode_results(results: &[FacetResult]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    for result in results {
        let blob = serde_json::to_vec(result)?;
        out.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        out.extend_from_slice(&blob);
    }
    Ok(out)
}

fn decode_results(bytes: &[u8]) -> Result<Vec<FacetResult>, CacheError> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(CacheError::Backend("truncated facet cache entry".into()));
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(CacheError::Backend("truncated facet cache entry".into()));
        }
        out.push(serde_json::from_slice(&rest[..len])?);
        rest = &rest[len..];
    }
    Ok(out)
}
