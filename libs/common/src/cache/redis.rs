//! Redis cache backend
//!
//! This module connects to Redis and stores cache entries with `SET EX`, using
//! a multiplexed async connection per call.

use async_trait::async_trait;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use std::time::Duration;
use tracing::info;

use super::{CacheProvider, DEFAULT_TTL, not_found};
use crate::context::Ctx;
use crate::error::DomainError;
use crate::log::LogBody;

/// Configuration for the Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis address, either a `redis://` URL or a bare `host:port`
    pub url: String,
    /// Password overriding the one in the URL, when not empty
    pub password: String,
    /// TTL applied to every entry
    pub default_ttl: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            password: password.into(),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis address (default: "redis://localhost:6379")
    /// - `REDIS_PASSWORD`: Redis password (default: empty)
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let password = std::env::var("REDIS_PASSWORD").unwrap_or_default();

        Self::new(url, password)
    }

    fn connection_info(&self) -> redis::RedisResult<redis::ConnectionInfo> {
        let url = if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        };

        let mut info = url.as_str().into_connection_info()?;
        if !self.password.is_empty() {
            info.redis.password = Some(self.password.clone());
        }
        Ok(info)
    }
}

/// [`CacheProvider`] backed by Redis
#[derive(Debug, Clone)]
pub struct RedisCache {
    client: Client,
    default_ttl: Duration,
}

impl RedisCache {
    /// Build the client; no connection is opened until the first command
    pub fn new(config: &RedisConfig) -> redis::RedisResult<Self> {
        let client = Client::open(config.connection_info()?)?;
        info!("Redis client initialized for {}", config.url);
        Ok(Self {
            client,
            default_ttl: config.default_ttl,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, DomainError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| backend_error("could not connect to redis", None, e))
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool, DomainError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("redis ping failed", None, e))?;
        Ok(pong == "PONG")
    }
}

fn backend_error(title: &str, key: Option<&str>, err: redis::RedisError) -> DomainError {
    let mut data = LogBody::new().with("error", err.to_string());
    if let Some(key) = key {
        data.insert("key", key);
    }
    DomainError::internal(title, data)
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn get_raw(&self, _ctx: &Ctx, key: &str) -> Result<Vec<u8>, DomainError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| backend_error("could not read from redis", Some(key), e))?;

        value.ok_or_else(|| not_found(key))
    }

    async fn set_raw(&self, _ctx: &Ctx, key: &str, value: Vec<u8>) -> Result<(), DomainError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(key, value, self.default_ttl.as_secs().max(1))
            .await
            .map_err(|e| backend_error("could not write to redis", Some(key), e))?;
        Ok(())
    }
}
