//! Two-tier cache of resolved decisions and effective permission sets
//!
//! Lookups go to the process-local tier first, then to the optional shared
//! tier (Redis). A shared hit repopulates the local tier. The cache is
//! derived state: dropping any entry, or all of them, only costs a store
//! round trip.
//!
//! Shared-tier failures never reach callers. They are logged, counted in
//! `gatekeeper_cache_tier_errors_total` and treated as misses.

mod local;
mod pubsub;
mod shared;

pub use local::LocalCacheTier;
pub use pubsub::{InvalidationBroadcaster, InvalidationListener, InvalidationMessage, InvalidationScope};
pub use shared::RedisCacheTier;

use crate::domain::{EffectivePermissions, StringUuid};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Value stored under a cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    Decision(bool),
    Effective(EffectivePermissions),
}

/// A value read from a tier together with its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub value: CachedValue,
    pub ttl: Duration,
}

/// One storage tier of the cache
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short label used in logs and metrics
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheHit>>;

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`
    async fn invalidate_prefix(&self, prefix: &str) -> Result<()>;

    /// Remove every entry of this cache's namespace
    async fn clear(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Builds cache keys under a deployment-wide namespace.
///
/// Layout:
///
/// ```text
/// {ns}:t:{tenant}:p:{principal}:d:{resource}:{action}:{instance|*}   decision
/// {ns}:t:{tenant}:p:{principal}:*                                     effective set
/// {ns}:sa:{principal}                                                 SuperAdmin flag
/// ```
///
/// Resource, action and instance segments are escaped so a `:` inside them
/// cannot forge another key.
#[derive(Debug, Clone)]
pub struct CacheKey {
    namespace: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn decision(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        resource: &str,
        action: &str,
        resource_instance_id: Option<&str>,
    ) -> String {
        let instance = resource_instance_id
            .map(escape_segment)
            .unwrap_or_else(|| "*".to_string());
        format!(
            "{}d:{}:{}:{}",
            self.principal_prefix(principal_id, tenant_id),
            escape_segment(resource),
            escape_segment(action),
            instance
        )
    }

    pub fn effective(&self, principal_id: StringUuid, tenant_id: StringUuid) -> String {
        format!("{}*", self.principal_prefix(principal_id, tenant_id))
    }

    pub fn super_admin(&self, principal_id: StringUuid) -> String {
        format!("{}:sa:{}", self.namespace, principal_id)
    }

    /// Covers every decision and the effective set of one pair
    pub fn principal_prefix(&self, principal_id: StringUuid, tenant_id: StringUuid) -> String {
        format!("{}p:{}:", self.tenant_prefix(tenant_id), principal_id)
    }

    /// Covers every principal in one tenant
    pub fn tenant_prefix(&self, tenant_id: StringUuid) -> String {
        format!("{}:t:{}:", self.namespace, tenant_id)
    }

    /// Covers the whole namespace
    pub fn namespace_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

/// `%` and `:` are percent-encoded; `*` is encoded so a literal instance
/// named `*` differs from "no instance".
fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '*' => escaped.push_str("%2A"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Local tier plus optional shared tier.
///
/// Every eviction bumps an epoch counter. A resolver captures the epoch
/// before reading the store and writes its result with `set_if_current`,
/// which drops the write when an eviction happened in between. That keeps a
/// read that raced a mutation from repopulating the cache with pre-write
/// data.
pub struct TieredCache {
    local: Arc<dyn CacheTier>,
    shared: Option<Arc<dyn CacheTier>>,
    local_ttl: Duration,
    shared_ttl: Duration,
    epoch: AtomicU64,
}

impl TieredCache {
    pub fn new(
        local: Arc<dyn CacheTier>,
        shared: Option<Arc<dyn CacheTier>>,
        local_ttl: Duration,
        shared_ttl: Duration,
    ) -> Self {
        Self {
            local,
            shared,
            local_ttl,
            shared_ttl,
            epoch: AtomicU64::new(0),
        }
    }

    /// Local tier only
    pub fn local_only(local: Arc<dyn CacheTier>, local_ttl: Duration) -> Self {
        Self::new(local, None, local_ttl, local_ttl)
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn get(&self, key: &str) -> Option<CachedValue> {
        let epoch = self.epoch();
        match self.local.get(key).await {
            Ok(Some(hit)) => {
                record_lookup(self.local.name(), "hit");
                return Some(hit.value);
            }
            Ok(None) => record_lookup(self.local.name(), "miss"),
            Err(e) => record_tier_error(self.local.name(), "get", &e),
        }

        let shared = self.shared.as_ref()?;
        match shared.get(key).await {
            Ok(Some(hit)) => {
                record_lookup(shared.name(), "hit");
                let local_ttl = self.local_ttl.min(hit.ttl);
                if !local_ttl.is_zero() {
                    match self.local.set(key, hit.value.clone(), local_ttl).await {
                        Ok(()) => {
                            if self.epoch() != epoch {
                                remove_quietly(self.local.as_ref(), key).await;
                            }
                        }
                        Err(e) => record_tier_error(self.local.name(), "set", &e),
                    }
                }
                Some(hit.value)
            }
            Ok(None) => {
                record_lookup(shared.name(), "miss");
                None
            }
            Err(e) => {
                record_tier_error(shared.name(), "get", &e);
                None
            }
        }
    }

    /// `set`, unless an eviction happened since `observed_epoch`.
    ///
    /// The epoch is re-read after each tier write. An eviction that lands
    /// while a write is in flight removes the key just written from every
    /// tier, so a pre-eviction value never outlives the eviction.
    pub async fn set_if_current(
        &self,
        key: &str,
        value: CachedValue,
        max_ttl: Option<Duration>,
        observed_epoch: u64,
    ) -> bool {
        if self.epoch() != observed_epoch {
            tracing::debug!(key, "Skipping cache write that raced an eviction");
            return false;
        }
        let Some((local_ttl, shared_ttl)) = self.ttls(max_ttl) else {
            return true;
        };

        if let Err(e) = self.local.set(key, value.clone(), local_ttl).await {
            record_tier_error(self.local.name(), "set", &e);
        }
        if self.epoch() != observed_epoch {
            self.retract(key, false).await;
            return false;
        }

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set(key, value, shared_ttl).await {
                record_tier_error(shared.name(), "set", &e);
            }
            if self.epoch() != observed_epoch {
                self.retract(key, true).await;
                return false;
            }
        }
        true
    }

    /// Store `value` in both tiers. `max_ttl` caps each tier's own TTL, e.g.
    /// when the underlying grant expires sooner.
    pub async fn set(&self, key: &str, value: CachedValue, max_ttl: Option<Duration>) {
        let Some((local_ttl, shared_ttl)) = self.ttls(max_ttl) else {
            return;
        };

        if let Err(e) = self.local.set(key, value.clone(), local_ttl).await {
            record_tier_error(self.local.name(), "set", &e);
        }
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set(key, value, shared_ttl).await {
                record_tier_error(shared.name(), "set", &e);
            }
        }
    }

    /// Local and shared TTLs after the cap; `None` when nothing may be cached
    fn ttls(&self, max_ttl: Option<Duration>) -> Option<(Duration, Duration)> {
        let cap = |ttl: Duration| max_ttl.map_or(ttl, |max| ttl.min(max));
        let local_ttl = cap(self.local_ttl);
        if local_ttl.is_zero() {
            return None;
        }
        Some((local_ttl, cap(self.shared_ttl)))
    }

    /// Undo a write that an eviction overtook
    async fn retract(&self, key: &str, shared_written: bool) {
        tracing::debug!(key, "Retracting cache write overtaken by an eviction");
        remove_quietly(self.local.as_ref(), key).await;
        if shared_written {
            if let Some(shared) = &self.shared {
                remove_quietly(shared.as_ref(), key).await;
            }
        }
    }

    /// Evict `prefix` from both tiers. A shared-tier failure is reported
    /// after the local tier has been evicted.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<()> {
        self.evict_local(prefix).await;

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.invalidate_prefix(prefix).await {
                record_tier_error(shared.name(), "invalidate", &e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Evict `prefix` from the local tier only, as peers do on broadcast
    pub async fn evict_local(&self, prefix: &str) {
        self.bump_epoch();
        if let Err(e) = self.local.invalidate_prefix(prefix).await {
            record_tier_error(self.local.name(), "invalidate", &e);
        }
    }

    pub async fn clear_local(&self) {
        self.bump_epoch();
        if let Err(e) = self.local.clear().await {
            record_tier_error(self.local.name(), "clear", &e);
        }
    }

    /// Drop everything in both tiers
    pub async fn flush(&self) -> Result<()> {
        self.clear_local().await;

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.clear().await {
                record_tier_error(shared.name(), "clear", &e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Ping the shared tier; `Ok` when there is none
    pub async fn ping(&self) -> Result<()> {
        match &self.shared {
            Some(shared) => shared.ping().await,
            None => Ok(()),
        }
    }
}

async fn remove_quietly(tier: &dyn CacheTier, key: &str) {
    if let Err(e) = tier.remove(key).await {
        record_tier_error(tier.name(), "remove", &e);
    }
}

fn record_lookup(tier: &'static str, result: &'static str) {
    metrics::counter!("gatekeeper_cache_lookups_total", "tier" => tier, "result" => result)
        .increment(1);
}

fn record_tier_error(tier: &'static str, operation: &'static str, error: &crate::error::AppError) {
    tracing::warn!(tier, operation, error = %error, "Cache tier operation failed");
    metrics::counter!(
        "gatekeeper_cache_tier_errors_total",
        "tier" => tier,
        "operation" => operation
    )
    .increment(1);
}
