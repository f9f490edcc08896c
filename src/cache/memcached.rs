//! Memcached cache adapter.
//!
//! Memcached cannot enumerate keys, so clear works through version
//! counters baked into the key prefix: bumping a counter strands every
//! key minted under the previous version, invalidating without deletion.
//! Normal and sticky entries ride separate counters so an ordinary clear
//! leaves sticky entries reachable.
//!
//! ```text
//! normal  FSPHINX_v<N>_<key>     N = FSPHINX_VERSION
//! sticky  FSPHINX_s<M>_<key>     M = FSPHINX_STICKY_VERSION
//! ```
//!
//! The `memcache` client is blocking; every call goes through
//! `spawn_blocking`. Clearing is namespace-wide (the env prefix cannot be
//! honored without enumeration), which over-invalidates safely since each
//! entry is self-contained.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CacheError, KvStore, NAMESPACE, STICKY_MARKER};
use crate::retry::{retry, RetryConfig};

const VERSION_KEY: &str = "FSPHINX_VERSION";
const STICKY_VERSION_KEY: &str = "FSPHINX_STICKY_VERSION";

pub struct MemcachedStore {
    client: Arc<memcache::Client>,
}

impl MemcachedStore {
    /// Connect with startup retry semantics, e.g.
    /// `memcache://127.0.0.1:11211`.
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        let client = retry("memcached_connect", &RetryConfig::startup(), || {
            let url = connection_string.to_string();
            async move {
                tokio::task::spawn_blocking(move || memcache::Client::connect(url))
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?
                    .map_err(|e| CacheError::Connect(e.to_string()))
            }
        })
        .await?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    /// Current counter value for the normal or sticky generation,
    /// initializing it on first use.
    async fn version(&self, sticky: bool) -> Result<u64, CacheError> {
        let counter = if sticky { STICKY_VERSION_KEY } else { VERSION_KEY };
        self.with_client(move |client| {
            if let Some(version) = client.get::<u64>(counter)? {
                return Ok(version);
            }
            // First use: seed the counter. A racing add is harmless.
            let _ = client.add(counter, 0u64, 0);
            Ok(client.get::<u64>(counter)?.unwrap_or(0))
        })
        .await
    }

    async fn bump(&self, sticky: bool) -> Result<(), CacheError> {
        // increment() requires the key to exist.
        self.version(sticky).await?;
        let counter = if sticky { STICKY_VERSION_KEY } else { VERSION_KEY };
        self.with_client(move |client| client.increment(counter, 1).map(|_| ()))
            .await
    }

    /// The key as stored, with the generation counter baked in.
    async fn versioned(&self, key: &str) -> Result<String, CacheError> {
        let sticky = key.starts_with(STICKY_MARKER);
        let version = self.version(sticky).await?;
        let generation = if sticky { 's' } else { 'v' };
        Ok(format!("{NAMESPACE}{generation}{version}_{key}"))
    }
}

#[async_trait]
impl KvStore for MemcachedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = self.versioned(key).await?;
        self.with_client(move |client| client.get::<Vec<u8>>(&key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = self.versioned(key).await?;
        let value = value.to_vec();
        self.with_client(move |client| {
            if overwrite {
                client.set(&key, &value[..], 0)?;
                return Ok(true);
            }
            // add() fails when the key exists; that is the decline path.
            Ok(client.add(&key, &value[..], 0).is_ok())
        })
        .await
    }

    async fn clear(&self, _prefix: &str, also_sticky: bool) -> Result<u64, CacheError> {
        self.bump(false).await?;
        if also_sticky {
            self.bump(true).await?;
        }
        // Invalidation by generation: nothing is deleted, nothing counted.
        Ok(0)
    }
}
