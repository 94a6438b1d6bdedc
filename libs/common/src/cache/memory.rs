//! In-process cache backend

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheProvider, not_found};
use crate::context::Ctx;
use crate::error::DomainError;

/// Default interval between expired-entry sweeps
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Cache stored in a shared map; expired entries are invisible and swept periodically
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    default_ttl: Duration,
}

impl MemoryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    /// Start the sweeper; it stops once every clone of the cache is dropped
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = purge(&entries);
                if removed > 0 {
                    debug!("Removed {} expired cache entries", removed);
                }
            }
        })
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(super::DEFAULT_TTL)
    }
}

fn purge(entries: &DashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    entries.retain(|_, entry| {
        let keep = entry.expires_at > now;
        removed += usize::from(!keep);
        keep
    });
    removed
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn get_raw(&self, _ctx: &Ctx, key: &str) -> Result<Vec<u8>, DomainError> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value.clone()),
            _ => Err(not_found(key)),
        }
    }

    async fn set_raw(&self, _ctx: &Ctx, key: &str, value: Vec<u8>) -> Result<(), DomainError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.default_ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}
