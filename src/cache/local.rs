//! Process-local cache tier backed by moka

use super::{CacheHit, CacheTier, CachedValue};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// In-process tier. Bounded by entry count with recency-based eviction;
/// reads never touch the network.
#[derive(Clone)]
pub struct LocalCacheTier {
    entries: Cache<String, LocalEntry>,
    max_ttl: Duration,
}

impl LocalCacheTier {
    /// `max_ttl` bounds every entry regardless of the TTL passed to `set`
    pub fn new(max_entries: u64, max_ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(max_ttl)
            .support_invalidation_closures()
            .build();

        Self { entries, max_ttl }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[async_trait]
impl CacheTier for LocalCacheTier {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        let now = Instant::now();
        match self.entries.get(key).await {
            Some(entry) if entry.expires_at > now => Ok(Some(CacheHit {
                ttl: entry.expires_at - now,
                value: entry.value,
            })),
            Some(_) => {
                self.entries.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<()> {
        let entry = LocalEntry {
            value,
            expires_at: Instant::now() + ttl.min(self.max_ttl),
        };
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.to_string();
        self.entries
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map_err(|e| AppError::CacheUnavailable(format!("local invalidation: {}", e)))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.invalidate_all();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
