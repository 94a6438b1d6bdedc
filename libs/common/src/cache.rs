//! Cache port and its backends
//!
//! Values are stored as JSON bytes under string keys with a default TTL. Both
//! backends report a missing or expired key as a `NotFound` domain error.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::context::Ctx;
use crate::error::DomainError;
use crate::log::LogBody;

pub use self::memory::MemoryCache;
pub use self::redis::{RedisCache, RedisConfig};

/// Default time-to-live for cache entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Key/value store holding serialized payloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Raw payload stored under `key`
    async fn get_raw(&self, ctx: &Ctx, key: &str) -> Result<Vec<u8>, DomainError>;

    /// Store `value` under `key` with the backend's default TTL
    async fn set_raw(&self, ctx: &Ctx, key: &str, value: Vec<u8>) -> Result<(), DomainError>;
}

/// Typed JSON access on top of any [`CacheProvider`]
#[async_trait]
pub trait CacheExt: CacheProvider {
    async fn get<T>(&self, ctx: &Ctx, key: &str) -> Result<T, DomainError>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.get_raw(ctx, key).await?;
        serde_json::from_slice(&raw).map_err(|e| {
            DomainError::internal(
                "could not decode cached value",
                LogBody::new().with("key", key).with("error", e.to_string()),
            )
        })
    }

    async fn set<T>(&self, ctx: &Ctx, key: &str, value: &T) -> Result<(), DomainError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_vec(value).map_err(|e| {
            DomainError::internal(
                "could not encode value for the cache",
                LogBody::new().with("key", key).with("error", e.to_string()),
            )
        })?;
        self.set_raw(ctx, key, raw).await
    }
}

impl<C: CacheProvider + ?Sized> CacheExt for C {}

pub(crate) fn not_found(key: &str) -> DomainError {
    DomainError::not_found("cache key not found", LogBody::new().with("key", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockall::predicate::eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Venue {
        id: String,
        name: String,
    }

    #[tokio::test]
    async fn test_set_serializes_values_as_json() {
        let mut cache = MockCacheProvider::new();
        cache
            .expect_set_raw()
            .with(
                mockall::predicate::always(),
                eq("venue:1"),
                eq(br#"{"id":"1","name":"Cafe"}"#.to_vec()),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let venue = Venue {
            id: "1".to_string(),
            name: "Cafe".to_string(),
        };
        cache
            .set(&Ctx::background(), "venue:1", &venue)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_decodes_stored_json() {
        let mut cache = MockCacheProvider::new();
        cache
            .expect_get_raw()
            .returning(|_, _| Ok(br#"{"id":"1","name":"Cafe"}"#.to_vec()));

        let venue: Venue = cache.get(&Ctx::background(), "venue:1").await.unwrap();
        assert_eq!(venue.name, "Cafe");
    }

    #[tokio::test]
    async fn test_get_reports_undecodable_values_as_internal() {
        let mut cache = MockCacheProvider::new();
        cache
            .expect_get_raw()
            .returning(|_, _| Ok(b"not json".to_vec()));

        let err = cache
            .get::<Venue>(&Ctx::background(), "venue:1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_get_passes_not_found_through() {
        let mut cache = MockCacheProvider::new();
        cache
            .expect_get_raw()
            .returning(|_, key| Err(not_found(key)));

        let err = cache
            .get::<Venue>(&Ctx::background(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
