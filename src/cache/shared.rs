//! Shared cache tier backed by Redis

use super::{CacheHit, CacheTier, CachedValue};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

/// Keys deleted per SCAN page
const SCAN_BATCH: usize = 500;

/// Redis tier shared by every instance of a deployment
#[derive(Clone)]
pub struct RedisCacheTier {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisCacheTier {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            AppError::CacheUnavailable(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            AppError::CacheUnavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self::new(conn, namespace))
    }

    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    /// Delete every key matching `pattern`, one SCAN page at a time
    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }
}

/// `PX` argument for `ttl`. Never rounds up, so an entry cannot outlive the
/// grant that capped it; `None` when less than a millisecond remains.
pub(crate) fn expiry_millis(ttl: Duration) -> Option<u64> {
    match u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX) {
        0 => None,
        ms => Some(ms),
    }
}

/// Escape glob metacharacters so a key prefix matches only itself
pub(crate) fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        let mut conn = self.conn.clone();
        let (raw, ttl_ms): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        // -1: no expiry set, -2: gone between the two commands
        let ttl = match ttl_ms {
            ms if ms > 0 => Duration::from_millis(ms as u64),
            -1 => Duration::MAX,
            _ => return Ok(None),
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(CacheHit { value, ttl })),
            Err(e) => {
                tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                let _: () = conn.del(key).await?;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(&value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cache serialize error: {}", e)))?;

        let Some(ttl_ms) = expiry_millis(ttl) else {
            return Ok(());
        };
        let _: () = conn.pset_ex(key, serialized, ttl_ms).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<()> {
        let pattern = format!("{}*", glob_escape(prefix));
        let deleted = self.delete_matching(&pattern).await?;
        tracing::debug!(prefix, deleted, "Evicted shared cache prefix");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let pattern = format!("{}:*", glob_escape(&self.namespace));
        let deleted = self.delete_matching(&pattern).await?;
        tracing::info!(namespace = %self.namespace, deleted, "Cleared shared cache namespace");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
