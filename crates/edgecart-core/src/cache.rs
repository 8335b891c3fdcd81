//! Named cache handles shared across requests.
//!
//! # Architecture
//!
//! ```text
//!  create_app_load_context ── CacheService::open("hydrogen")
//!                                   │
//!                             CacheRegistry (one handle per name, process-wide)
//!                                   │
//!                             CacheHandle (typed JSON helpers, validation)
//!                                   │
//!                             Arc<dyn CacheStore>  (object-safe, Bytes)
//!                                   │
//!                       ┌───────────┴───────────┐
//!                       ▼                       ▼
//!               MemoryCacheStore          host cache bindings
//! ```
//!
//! A handle is not request-exclusive: every request that opens the same name receives a
//! clone pointing at the same store. Stores handle their own synchronisation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EdgeError;

/// Errors returned by cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend is temporarily unavailable.
    #[error("cache unavailable: {name}")]
    Unavailable { name: String },

    /// An invalid cache name, key, value or TTL.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CacheError> for EdgeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Validation(e) => EdgeError::bad_request(format!("cache validation error: {e}")),
            other => EdgeError::internal(anyhow::Error::new(other)),
        }
    }
}

/// Object-safe interface for cache backends.
#[async_trait(?Send)]
pub trait CacheStore: Send + Sync {
    /// Returns `Ok(None)` for missing or expired entries.
    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn put_bytes(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    async fn put_bytes_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Returns `Ok(())` even if the key did not exist.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// A cloneable handle to one named cache.
#[derive(Clone)]
pub struct CacheHandle {
    name: Arc<str>,
    store: Arc<dyn CacheStore>,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Two handles are equal when they name the same cache and share the same store.
impl PartialEq for CacheHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.store, &other.store)
    }
}

impl CacheHandle {
    pub const MAX_KEY_SIZE: usize = 512;

    pub const MAX_VALUE_SIZE: usize = 25 * 1024 * 1024;

    pub fn new(name: impl Into<Arc<str>>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate_key(key: &str) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::Validation("key cannot be empty".to_string()));
        }
        if key.len() > Self::MAX_KEY_SIZE {
            return Err(CacheError::Validation(format!(
                "key length {} exceeds limit of {} bytes",
                key.len(),
                Self::MAX_KEY_SIZE
            )));
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(CacheError::Validation(
                "key contains invalid control characters".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_value(value: &[u8]) -> Result<(), CacheError> {
        if value.len() > Self::MAX_VALUE_SIZE {
            return Err(CacheError::Validation(format!(
                "value size {} exceeds limit of 25MB",
                value.len()
            )));
        }
        Ok(())
    }

    fn validate_ttl(ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::Validation("TTL must be positive".to_string()));
        }
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes(key, Bytes::from(bytes)).await
    }

    pub async fn put_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes_with_ttl(key, Bytes::from(bytes), ttl).await
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Self::validate_key(key)?;
        self.store.get_bytes(key).await
    }

    pub async fn put_bytes(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        Self::validate_key(key)?;
        Self::validate_value(&value)?;
        self.store.put_bytes(key, value).await
    }

    pub async fn put_bytes_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        Self::validate_key(key)?;
        Self::validate_ttl(ttl)?;
        Self::validate_value(&value)?;
        self.store.put_bytes_with_ttl(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        Self::validate_key(key)?;
        self.store.delete(key).await
    }
}

/// Host capability that opens named caches.
#[async_trait(?Send)]
pub trait CacheService: Send + Sync {
    async fn open(&self, name: &str) -> Result<CacheHandle, CacheError>;
}

type StoreFactory = dyn Fn(&str) -> Result<Arc<dyn CacheStore>, CacheError> + Send + Sync;

/// Process-wide cache registry: each name is opened once and every later `open` hands out a
/// clone of the same handle.
pub struct CacheRegistry {
    factory: Box<StoreFactory>,
    opened: Mutex<BTreeMap<String, CacheHandle>>,
}

impl CacheRegistry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn CacheStore>, CacheError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            opened: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of distinct caches opened so far.
    pub fn len(&self) -> usize {
        self.opened.lock().map(|opened| opened.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait(?Send)]
impl CacheService for CacheRegistry {
    async fn open(&self, name: &str) -> Result<CacheHandle, CacheError> {
        if name.is_empty() {
            return Err(CacheError::Validation("cache name cannot be empty".to_string()));
        }
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| CacheError::Internal(anyhow::anyhow!("cache registry lock poisoned")))?;
        if let Some(handle) = opened.get(name) {
            return Ok(handle.clone());
        }
        let store = (self.factory)(name)?;
        let handle = CacheHandle::new(name, store);
        opened.insert(name.to_string(), handle.clone());
        log::debug!("opened cache `{name}`");
        Ok(handle)
    }
}

/// Generate a suite of contract tests for any [`CacheStore`] implementation.
///
/// ```rust,ignore
/// edgecart_core::cache_contract_tests!(memory_cache_contract, MemoryCacheStore::new());
/// ```
#[macro_export]
macro_rules! cache_contract_tests {
    ($mod_name:ident, $factory:expr) => {
        mod $mod_name {
            use super::*;
            use bytes::Bytes;
            use $crate::cache::CacheStore;

            fn run<F: std::future::Future>(f: F) -> F::Output {
                futures::executor::block_on(f)
            }

            #[test]
            fn contract_put_and_get() {
                let store = $factory;
                run(async {
                    store.put_bytes("k", Bytes::from("v")).await.unwrap();
                    assert_eq!(store.get_bytes("k").await.unwrap(), Some(Bytes::from("v")));
                });
            }

            #[test]
            fn contract_get_missing_returns_none() {
                let store = $factory;
                run(async {
                    assert_eq!(store.get_bytes("missing").await.unwrap(), None);
                });
            }

            #[test]
            fn contract_put_overwrites() {
                let store = $factory;
                run(async {
                    store.put_bytes("k", Bytes::from("a")).await.unwrap();
                    store.put_bytes("k", Bytes::from("b")).await.unwrap();
                    assert_eq!(store.get_bytes("k").await.unwrap(), Some(Bytes::from("b")));
                });
            }

            #[test]
            fn contract_delete_removes_and_is_idempotent() {
                let store = $factory;
                run(async {
                    store.put_bytes("k", Bytes::from("v")).await.unwrap();
                    store.delete("k").await.unwrap();
                    store.delete("k").await.unwrap();
                    assert_eq!(store.get_bytes("k").await.unwrap(), None);
                });
            }

            #[test]
            fn contract_put_with_ttl_is_readable_before_expiry() {
                let store = $factory;
                run(async {
                    store
                        .put_bytes_with_ttl(
                            "k",
                            Bytes::from("v"),
                            std::time::Duration::from_secs(300),
                        )
                        .await
                        .unwrap();
                    assert_eq!(store.get_bytes("k").await.unwrap(), Some(Bytes::from("v")));
                });
            }
        }
    };
}
