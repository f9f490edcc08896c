//! Redis cache adapter.
//!
//! Plain `GET`/`SET` (with `NX` for add-if-absent) under the shared
//! namespace. Clear enumerates the namespace and deletes matching keys.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{clear_match, CacheError, KvStore, NAMESPACE};
use crate::retry::{retry, RetryConfig};

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect with startup retry semantics: fail fast on bad
    /// configuration instead of hanging forever.
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| CacheError::Connect(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Connect(e.to_string()))?;

        Ok(Self { connection })
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<Vec<u8>>>(Self::namespaced(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let key = Self::namespaced(key);
        if overwrite {
            conn.set::<_, _, ()>(&key, value)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            return Ok(true);
        }
        let written: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(written.is_some())
    }

    // TODO: switch the enumeration to SCAN; KEYS is O(keyspace) and
    // blocks the server on large deployments.
    async fn clear(&self, prefix: &str, also_sticky: bool) -> Result<u64, CacheError> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn
            .keys(format!("{NAMESPACE}*"))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let victims: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                key.strip_prefix(NAMESPACE)
                    .is_some_and(|rest| clear_match(rest, prefix, also_sticky))
            })
            .collect();
        if victims.is_empty() {
            return Ok(0);
        }
        conn.del::<_, u64>(victims)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}
