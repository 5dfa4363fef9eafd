//! Invalidation coordinator: turns committed mutations into cache evictions
//!
//! Callers raise events only after the store write has committed. Evictions
//! are applied to both local tiers first, then broadcast to peers.

use crate::cache::{CacheKey, InvalidationBroadcaster, InvalidationScope, TieredCache};
use crate::domain::{AuthzEvent, PrincipalTenant, StringUuid};
use crate::error::Result;
use crate::repository::PermissionStore;
use std::sync::Arc;

pub struct InvalidationCoordinator<S: PermissionStore> {
    store: Arc<S>,
    cache: Arc<TieredCache>,
    keys: CacheKey,
    broadcaster: Option<InvalidationBroadcaster>,
    fanout_limit: usize,
}

impl<S: PermissionStore> InvalidationCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<TieredCache>,
        keys: CacheKey,
        broadcaster: Option<InvalidationBroadcaster>,
        fanout_limit: usize,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            broadcaster,
            fanout_limit,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    #[tracing::instrument(skip_all, fields(event = event.name()))]
    pub async fn handle(&self, event: &AuthzEvent) -> Result<()> {
        match event {
            AuthzEvent::RoleAssignmentChanged {
                principal_id,
                tenant_id,
            } => {
                // The assignment may have been to SuperAdmin
                let super_admin = self
                    .evict(
                        InvalidationScope::Prefix(self.keys.super_admin(*principal_id)),
                        event.name(),
                    )
                    .await;
                let pair = self.evict_pair(*principal_id, *tenant_id, event.name()).await;
                super_admin.and(pair)
            }
            AuthzEvent::DirectGrantChanged {
                principal_id,
                tenant_id,
            }
            | AuthzEvent::PrincipalProvisioned {
                principal_id,
                tenant_id,
            } => self.evict_pair(*principal_id, *tenant_id, event.name()).await,
            AuthzEvent::RolePermissionChanged { role_id } => {
                self.invalidate_role_holders(*role_id, event.name()).await
            }
        }
    }

    /// Administrative hook: drop everything cached for one pair
    pub async fn invalidate_principal(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
    ) -> Result<()> {
        tracing::info!(principal_id = %principal_id, tenant_id = %tenant_id, "Invalidating principal");
        let super_admin = self
            .evict(
                InvalidationScope::Prefix(self.keys.super_admin(principal_id)),
                "admin",
            )
            .await;
        let pair = self.evict_pair(principal_id, tenant_id, "admin").await;
        super_admin.and(pair)
    }

    /// Drop the entire cache on every instance
    pub async fn flush_all(&self, reason: &'static str) -> Result<()> {
        self.evict(InvalidationScope::All, reason).await
    }

    async fn evict_pair(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        reason: &'static str,
    ) -> Result<()> {
        self.evict(
            InvalidationScope::Prefix(self.keys.principal_prefix(principal_id, tenant_id)),
            reason,
        )
        .await
    }

    /// Role holders come from the store, which acts as the reverse index
    /// `role -> (principal, tenant)`. Too many holders, or a failed lookup,
    /// widens the eviction to the role's tenant (or everything for a
    /// tenant-null role).
    async fn invalidate_role_holders(&self, role_id: StringUuid, reason: &'static str) -> Result<()> {
        let role = match self.store.find_role_by_id(role_id).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(role_id = %role_id, error = %e, "Role lookup failed, flushing cache");
                return self.flush_all(reason).await;
            }
        };

        let tenant_id = match role.as_ref().and_then(|role| role.tenant_id) {
            Some(tenant_id) => tenant_id,
            None => {
                tracing::info!(role_id = %role_id, "System or unknown role changed, flushing cache");
                return self.flush_all(reason).await;
            }
        };

        let holders = match self.store.find_role_holders(role_id).await {
            Ok(holders) => holders,
            Err(e) => {
                tracing::warn!(role_id = %role_id, error = %e, "Role holder lookup failed, evicting tenant");
                return self.evict_tenant(tenant_id, reason).await;
            }
        };

        if holders.len() > self.fanout_limit {
            tracing::info!(
                role_id = %role_id,
                holders = holders.len(),
                limit = self.fanout_limit,
                "Role has too many holders, evicting tenant"
            );
            return self.evict_tenant(tenant_id, reason).await;
        }

        let mut first_error = None;
        for PrincipalTenant {
            principal_id,
            tenant_id,
        } in holders
        {
            if let Err(e) = self.evict_pair(principal_id, tenant_id, reason).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn evict_tenant(&self, tenant_id: StringUuid, reason: &'static str) -> Result<()> {
        self.evict(
            InvalidationScope::Prefix(self.keys.tenant_prefix(tenant_id)),
            reason,
        )
        .await
    }

    /// Apply locally, then broadcast. A failed broadcast is logged; peers
    /// fall back to their local TTL.
    async fn evict(&self, scope: InvalidationScope, reason: &'static str) -> Result<()> {
        let applied = match &scope {
            InvalidationScope::Prefix(prefix) => self.cache.invalidate_prefix(prefix).await,
            InvalidationScope::All => self.cache.flush().await,
        };
        metrics::counter!("gatekeeper_cache_invalidations_total", "reason" => reason).increment(1);

        if let Some(broadcaster) = &self.broadcaster {
            if let Err(e) = broadcaster.publish(scope).await {
                tracing::warn!(error = %e, "Failed to broadcast cache invalidation");
            }
        }

        applied
    }
}
