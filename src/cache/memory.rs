//! In-process cache adapter.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{clear_match, CacheError, KvStore, NAMESPACE};

/// A `DashMap`-backed store, the default for tests and single-process
/// deployments.
pub struct InMemoryStore {
    data: DashMap<String, Vec<u8>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.data.get(&Self::namespaced(key)).map(|r| r.value().clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = Self::namespaced(key);
        if overwrite {
            self.data.insert(key, value.to_vec());
            return Ok(true);
        }
        match self.data.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(value.to_vec());
                Ok(true)
            }
        }
    }

    async fn clear(&self, prefix: &str, also_sticky: bool) -> Result<u64, CacheError> {
        let mut removed = 0u64;
        self.data.retain(|key, _| {
            let evict = key
                .strip_prefix(NAMESPACE)
                .is_some_and(|rest| clear_match(rest, prefix, also_sticky));
            if evict {
                removed += 1;
            }
            !evict
        });
        Ok(removed)
    }
}
