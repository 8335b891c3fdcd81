//! In-memory cache store for local development and testing.
//!
//! Entries live in a `BTreeMap` behind a `std::sync::Mutex`; expired entries are evicted
//! lazily when read.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use edgecart_core::cache::{CacheError, CacheRegistry, CacheStore};
use web_time::Instant;

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    data: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose caches are each backed by a fresh in-memory store.
    pub fn registry() -> CacheRegistry {
        CacheRegistry::new(|name| {
            log::debug!("creating in-memory cache `{name}`");
            Ok(Arc::new(MemoryCacheStore::new()) as Arc<dyn CacheStore>)
        })
    }

    /// Live entries, without evicting expired ones.
    pub fn len(&self) -> usize {
        self.data
            .lock()
            .map(|data| data.values().filter(|entry| !entry.is_expired()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, BTreeMap<String, Entry>>, CacheError> {
        self.data
            .lock()
            .map_err(|_| CacheError::Internal(anyhow::anyhow!("cache store lock poisoned")))
    }

    fn insert(&self, key: &str, value: Bytes, expires_at: Option<Instant>) -> Result<(), CacheError> {
        self.lock_data()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[async_trait(?Send)]
impl CacheStore for MemoryCacheStore {
    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut data = self.lock_data()?;
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put_bytes(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.insert(key, value, None)
    }

    async fn put_bytes_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert(key, value, Some(Instant::now() + ttl))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock_data()?.remove(key);
        Ok(())
    }
}
