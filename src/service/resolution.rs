//! Resolution engine: answers "may principal P do A on R in tenant T?"
//!
//! Order of evaluation for a check:
//!
//! 1. SuperAdmin (cached under a principal-only key) grants immediately.
//! 2. A missing tenant fails with `TenantContextMissing`.
//! 3. Non-members are denied. Membership is read from the store on every
//!    check and non-member results are never cached.
//! 4. Cached decision or cached effective set answers directly.
//! 5. Role-granted and direct-grant sources are read from the store and
//!    unioned. Any store failure denies.
//!
//! A `true` result is cached no longer than the latest expiry of the
//! sources that produced it, so an expiring grant cannot outlive itself in
//! the cache.
//!
//! Writes are visible to subsequent checks on the instance that made them
//! as soon as the mutation returns. Other instances converge once the
//! invalidation broadcast arrives; a caller that needs its own write
//! reflected everywhere immediately passes `CheckOptions::bypass_cache`.

use crate::cache::{CacheKey, CachedValue, TieredCache};
use crate::config::ResolutionConfig;
use crate::domain::{
    AccessDecision, CheckPermissionInput, DecisionOutcome, DirectGrantPermission,
    EffectivePermissions, InstanceGrant, PermissionKey, PermissionQuery, PrincipalTenant,
    RoleGrantedPermission, StringUuid,
};
use crate::error::{AppError, Result};
use crate::repository::PermissionStore;
use crate::service::boundary;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use validator::Validate;

/// Source of "now" for expiry comparisons
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-call knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Deadline for the whole resolution; the resolver default when `None`
    pub timeout: Option<Duration>,
    /// Skip cache reads. The fresh result is still written back.
    pub bypass_cache: bool,
}

impl CheckOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

pub struct PermissionResolver<S: PermissionStore> {
    store: Arc<S>,
    cache: Arc<TieredCache>,
    keys: CacheKey,
    super_admin_role_id: StringUuid,
    default_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: PermissionStore> PermissionResolver<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<TieredCache>,
        keys: CacheKey,
        config: &ResolutionConfig,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            super_admin_role_id: StringUuid::from(config.super_admin_role_id),
            default_timeout: config.default_timeout(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn super_admin_role_id(&self) -> StringUuid {
        self.super_admin_role_id
    }

    /// `Ok(true)` only when a granting source was found. Every error path
    /// means "deny".
    #[tracing::instrument(
        skip_all,
        fields(
            principal_id = %input.principal_id,
            tenant_id = ?input.tenant_id,
            resource = %input.resource,
            action = %input.action
        )
    )]
    pub async fn check_permission(
        &self,
        input: &CheckPermissionInput,
        options: CheckOptions,
    ) -> Result<bool> {
        let outcome = self.resolve(input, options).await?;
        Ok(matches!(
            outcome,
            DecisionOutcome::Granted | DecisionOutcome::SuperAdmin
        ))
    }

    /// Decision with its reason. Errors still surface; callers map them to
    /// a denial themselves.
    pub async fn evaluate(
        &self,
        input: &CheckPermissionInput,
        options: CheckOptions,
    ) -> Result<AccessDecision> {
        Ok(match self.resolve(input, options).await? {
            DecisionOutcome::Granted => AccessDecision::granted(),
            DecisionOutcome::SuperAdmin => AccessDecision::super_admin(),
            outcome => AccessDecision::denied(outcome),
        })
    }

    /// Same as `check_permission` but never errors: failures become an
    /// `Indeterminate` denial carrying the error code.
    pub async fn decide(&self, input: &CheckPermissionInput, options: CheckOptions) -> AccessDecision {
        match self.evaluate(input, options).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    principal_id = %input.principal_id,
                    code = e.code(),
                    error = %e,
                    "Permission check could not be determined, denying"
                );
                AccessDecision::indeterminate(e.code())
            }
        }
    }

    /// Full resolution with metrics and the deadline applied
    async fn resolve(
        &self,
        input: &CheckPermissionInput,
        options: CheckOptions,
    ) -> Result<DecisionOutcome> {
        let started = Instant::now();
        let result = match input.validate() {
            Ok(()) => {
                self.with_deadline(options, self.resolve_check(input, options.bypass_cache))
                    .await
            }
            Err(e) => Err(AppError::from(e)),
        };

        let label = match &result {
            Ok(DecisionOutcome::Granted) | Ok(DecisionOutcome::SuperAdmin) => "granted",
            Ok(_) => "denied",
            Err(_) => "error",
        };
        metrics::counter!("gatekeeper_permission_checks_total", "result" => label).increment(1);
        metrics::histogram!("gatekeeper_permission_check_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn resolve_check(
        &self,
        input: &CheckPermissionInput,
        bypass_cache: bool,
    ) -> Result<DecisionOutcome> {
        let principal_id = StringUuid::from(input.principal_id);
        let now = self.clock.now();

        if self.is_super_admin(principal_id, now, bypass_cache).await? {
            tracing::debug!("SuperAdmin bypass");
            return Ok(DecisionOutcome::SuperAdmin);
        }

        let tenant_id = input.tenant().ok_or(AppError::TenantContextMissing)?;
        let instance = input.resource_instance_id.as_deref();
        let key = self
            .keys
            .decision(principal_id, tenant_id, &input.resource, &input.action, instance);

        let epoch = self.cache.epoch();
        let member = self
            .store_call("find_membership", || {
                boundary::has_membership(self.store.as_ref(), principal_id, tenant_id)
            })
            .await?;
        if !member {
            tracing::debug!("Principal is not a member of the tenant");
            return Ok(DecisionOutcome::NotMember);
        }

        if !bypass_cache {
            if let Some(allowed) = self
                .cached_decision(&key, principal_id, tenant_id, input, instance)
                .await
            {
                return Ok(if allowed {
                    DecisionOutcome::Granted
                } else {
                    DecisionOutcome::NoGrant
                });
            }
        }

        let query = PermissionQuery {
            principal_id,
            tenant_id,
            resource: input.resource.clone(),
            action: input.action.clone(),
            resource_instance_id: input.resource_instance_id.clone(),
            now,
        };

        let role_rows = self
            .store_call("find_role_granted_permissions", || {
                self.store.find_role_granted_permissions(&query)
            })
            .await?;
        let direct_rows = self
            .store_call("find_matching_direct_grants", || {
                self.store.find_matching_direct_grants(&query)
            })
            .await?;

        let role_rows: Vec<_> = boundary::retain_in_boundary(tenant_id, role_rows)
            .into_iter()
            .filter(|row| {
                row.resource == query.resource
                    && row.action == query.action
                    && expiry_is_active(row.assignment_expires_at, now)
            })
            .collect();
        let direct_rows: Vec<_> = boundary::retain_in_boundary(tenant_id, direct_rows)
            .into_iter()
            .filter(|row| {
                row.resource == query.resource
                    && row.action == query.action
                    && row.is_active(now)
                    && row.covers_instance(instance)
            })
            .collect();

        let allowed = !role_rows.is_empty() || !direct_rows.is_empty();
        let max_ttl = if allowed {
            let expiries = role_rows
                .iter()
                .map(|row| row.assignment_expires_at)
                .chain(direct_rows.iter().map(|row| row.expires_at));
            latest_expiry(expiries).map(|expires_at| ttl_until(expires_at, now))
        } else {
            None
        };

        self.cache
            .set_if_current(&key, CachedValue::Decision(allowed), max_ttl, epoch)
            .await;

        tracing::debug!(
            allowed,
            role_sources = role_rows.len(),
            direct_sources = direct_rows.len(),
            "Resolved from store"
        );

        Ok(if allowed {
            DecisionOutcome::Granted
        } else {
            DecisionOutcome::NoGrant
        })
    }

    /// Decision key first, then the pair's effective set
    async fn cached_decision(
        &self,
        key: &str,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        input: &CheckPermissionInput,
        instance: Option<&str>,
    ) -> Option<bool> {
        match self.cache.get(key).await {
            Some(CachedValue::Decision(allowed)) => return Some(allowed),
            Some(CachedValue::Effective(_)) | None => {}
        }

        let effective_key = self.keys.effective(principal_id, tenant_id);
        match self.cache.get(&effective_key).await {
            Some(CachedValue::Effective(effective)) => {
                Some(effective.allows(&input.resource, &input.action, instance))
            }
            _ => None,
        }
    }

    /// Active SuperAdmin assignment, cached under the principal-only key
    async fn is_super_admin(
        &self,
        principal_id: StringUuid,
        now: DateTime<Utc>,
        bypass_cache: bool,
    ) -> Result<bool> {
        let key = self.keys.super_admin(principal_id);
        if !bypass_cache {
            if let Some(CachedValue::Decision(is_super_admin)) = self.cache.get(&key).await {
                return Ok(is_super_admin);
            }
        }

        let epoch = self.cache.epoch();
        let assignment = self
            .store_call("find_active_system_role_assignment", || {
                self.store.find_active_system_role_assignment(
                    principal_id,
                    self.super_admin_role_id,
                    now,
                )
            })
            .await?;

        let is_super_admin = assignment.is_some();
        let max_ttl = assignment
            .and_then(|assignment| assignment.expires_at)
            .map(|expires_at| ttl_until(expires_at, now));
        self.cache
            .set_if_current(&key, CachedValue::Decision(is_super_admin), max_ttl, epoch)
            .await;

        Ok(is_super_admin)
    }

    /// Everything the principal may do in the tenant. Non-members get an
    /// empty set; SuperAdmin is reported through the `super_admin` flag.
    #[tracing::instrument(skip_all, fields(principal_id = %principal_id, tenant_id = ?tenant_id))]
    pub async fn effective_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: Option<StringUuid>,
        options: CheckOptions,
    ) -> Result<EffectivePermissions> {
        self.with_deadline(
            options,
            self.resolve_effective(principal_id, tenant_id, options.bypass_cache),
        )
        .await
    }

    async fn resolve_effective(
        &self,
        principal_id: StringUuid,
        tenant_id: Option<StringUuid>,
        bypass_cache: bool,
    ) -> Result<EffectivePermissions> {
        let now = self.clock.now();
        let super_admin = self.is_super_admin(principal_id, now, bypass_cache).await?;

        let tenant_id = match tenant_id.filter(|tenant_id| !tenant_id.is_nil()) {
            Some(tenant_id) => tenant_id,
            None if super_admin => {
                return Ok(EffectivePermissions {
                    super_admin: true,
                    ..Default::default()
                })
            }
            None => return Err(AppError::TenantContextMissing),
        };

        let epoch = self.cache.epoch();
        if !super_admin {
            let member = self
                .store_call("find_membership", || {
                    boundary::has_membership(self.store.as_ref(), principal_id, tenant_id)
                })
                .await?;
            if !member {
                return Ok(EffectivePermissions::default());
            }
        }

        let key = self.keys.effective(principal_id, tenant_id);
        if !bypass_cache {
            if let Some(CachedValue::Effective(mut effective)) = self.cache.get(&key).await {
                effective.super_admin = super_admin;
                return Ok(effective);
            }
        }

        let role_rows = self
            .store_call("list_role_granted_permissions", || {
                self.store
                    .list_role_granted_permissions(principal_id, tenant_id, now)
            })
            .await?;
        let direct_rows = self
            .store_call("list_direct_grant_permissions", || {
                self.store
                    .list_direct_grant_permissions(principal_id, tenant_id, now)
            })
            .await?;

        let (effective, earliest_expiry) = build_effective_set(
            boundary::retain_in_boundary(tenant_id, role_rows),
            boundary::retain_in_boundary(tenant_id, direct_rows),
            now,
        );

        self.cache
            .set_if_current(
                &key,
                CachedValue::Effective(effective.clone()),
                earliest_expiry.map(|expires_at| ttl_until(expires_at, now)),
                epoch,
            )
            .await;

        Ok(EffectivePermissions {
            super_admin,
            ..effective
        })
    }

    /// Pre-populate effective sets. Returns how many pairs were warmed.
    pub async fn warm_cache(&self, pairs: &[PrincipalTenant]) -> usize {
        let mut warmed = 0;
        for pair in pairs {
            match self
                .effective_permissions(
                    pair.principal_id,
                    Some(pair.tenant_id),
                    CheckOptions::default().bypassing_cache(),
                )
                .await
            {
                Ok(_) => warmed += 1,
                Err(e) => tracing::warn!(
                    principal_id = %pair.principal_id,
                    tenant_id = %pair.tenant_id,
                    error = %e,
                    "Cache warm-up failed for pair"
                ),
            }
        }
        warmed
    }

    /// Warm the pairs with the most recent active role assignments
    pub async fn warm_from_store(&self, limit: u32) -> Result<usize> {
        let now = self.clock.now();
        let pairs = self
            .store_call("list_recent_principals", || {
                self.store.list_recent_principals(limit, now)
            })
            .await?;
        let warmed = self.warm_cache(&pairs).await;
        tracing::info!(candidates = pairs.len(), warmed, "Permission cache warmed");
        Ok(warmed)
    }

    async fn with_deadline<T, F>(&self, options: CheckOptions, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = options.timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = deadline.as_millis() as u64, "Permission resolution timed out");
                Err(AppError::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    /// Run one store read, collapsing infrastructure failures into
    /// `StoreUnavailable`
    async fn store_call<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call().await.map_err(|e| {
            let e = e.into_store_error();
            tracing::error!(operation, error = %e, "Permission store read failed");
            metrics::counter!("gatekeeper_store_errors_total", "operation" => operation)
                .increment(1);
            e
        })
    }
}

fn expiry_is_active(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map_or(true, |expires_at| expires_at > now)
}

/// `None` when any source never expires
fn latest_expiry(
    expiries: impl Iterator<Item = Option<DateTime<Utc>>>,
) -> Option<DateTime<Utc>> {
    let mut latest: Option<DateTime<Utc>> = None;
    for expiry in expiries {
        let expiry = expiry?;
        latest = Some(latest.map_or(expiry, |current| current.max(expiry)));
    }
    latest
}

fn ttl_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Union of both sources. Returns the set and the earliest expiry of any
/// contributing source.
fn build_effective_set(
    role_rows: Vec<RoleGrantedPermission>,
    direct_rows: Vec<DirectGrantPermission>,
    now: DateTime<Utc>,
) -> (EffectivePermissions, Option<DateTime<Utc>>) {
    let mut permissions: BTreeSet<PermissionKey> = BTreeSet::new();
    let mut instance_grants: BTreeSet<InstanceGrant> = BTreeSet::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut track = |expires_at: Option<DateTime<Utc>>| {
        if let Some(expires_at) = expires_at {
            earliest = Some(earliest.map_or(expires_at, |current| current.min(expires_at)));
        }
    };

    for row in role_rows {
        if !expiry_is_active(row.assignment_expires_at, now) {
            continue;
        }
        track(row.assignment_expires_at);
        permissions.insert(row.key());
    }

    for row in direct_rows {
        if !row.is_active(now) {
            continue;
        }
        track(row.expires_at);
        match &row.resource_instance_id {
            None => {
                permissions.insert(row.key());
            }
            Some(instance) => {
                instance_grants.insert(InstanceGrant {
                    resource: row.resource.clone(),
                    action: row.action.clone(),
                    resource_instance_id: instance.clone(),
                });
            }
        }
    }

    let effective = EffectivePermissions {
        permissions: permissions.into_iter().collect(),
        instance_grants: instance_grants.into_iter().collect(),
        super_admin: false,
    };
    (effective, earliest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheTier;
    use crate::domain::{RoleAssignment, TenantMembership};
    use crate::repository::MockPermissionStore;
    use chrono::Duration as ChronoDuration;
    use mockall::predicate::*;
    use pretty_assertions::assert_eq;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct Fixture {
        principal: StringUuid,
        tenant: StringUuid,
        super_admin_role: StringUuid,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                principal: StringUuid::new_v4(),
                tenant: StringUuid::new_v4(),
                super_admin_role: StringUuid::new_v4(),
                now: Utc::now(),
            }
        }

        fn resolver(&self, mock: MockPermissionStore) -> PermissionResolver<MockPermissionStore> {
            let config = ResolutionConfig {
                super_admin_role_id: *self.super_admin_role,
                default_timeout_ms: 1_000,
                default_role_name: None,
                role_fanout_limit: 100,
            };
            let cache = Arc::new(TieredCache::local_only(
                Arc::new(LocalCacheTier::new(1_000, Duration::from_secs(60))),
                Duration::from_secs(60),
            ));
            PermissionResolver::new(Arc::new(mock), cache, CacheKey::new("test"), &config)
                .with_clock(Arc::new(FixedClock(self.now)))
        }

        fn input(&self, resource: &str, action: &str) -> CheckPermissionInput {
            CheckPermissionInput::new(*self.principal, *self.tenant, resource, action)
        }

        fn role_row(&self, resource: &str, action: &str) -> RoleGrantedPermission {
            RoleGrantedPermission {
                role_id: StringUuid::new_v4(),
                permission_id: StringUuid::new_v4(),
                permission_tenant_id: self.tenant,
                resource: resource.to_string(),
                action: action.to_string(),
                assignment_expires_at: None,
            }
        }

        fn direct_row(&self, resource: &str, action: &str, instance: Option<&str>) -> DirectGrantPermission {
            DirectGrantPermission {
                grant_id: StringUuid::new_v4(),
                principal_id: self.principal,
                tenant_id: self.tenant,
                permission_id: StringUuid::new_v4(),
                permission_tenant_id: self.tenant,
                resource: resource.to_string(),
                action: action.to_string(),
                resource_instance_id: instance.map(str::to_string),
                expires_at: None,
            }
        }
    }

    fn member_store(fx: &Fixture) -> MockPermissionStore {
        let mut mock = MockPermissionStore::new();
        mock.expect_find_active_system_role_assignment()
            .returning(|_, _, _| Ok(None));
        let (principal, tenant) = (fx.principal, fx.tenant);
        mock.expect_find_membership()
            .with(eq(principal), eq(tenant))
            .returning(|p, t| Ok(Some(TenantMembership::new(p, t, true))));
        mock
    }

    #[tokio::test]
    async fn test_role_grant_allows() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        let row = fx.role_row("documents", "write");
        mock.expect_find_role_granted_permissions()
            .returning(move |_| Ok(vec![row.clone()]));
        mock.expect_find_matching_direct_grants()
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let allowed = resolver
            .check_permission(&fx.input("documents", "write"), CheckOptions::default())
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_second_check_is_served_from_cache() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        let row = fx.role_row("documents", "write");
        mock.expect_find_role_granted_permissions()
            .times(1)
            .returning(move |_| Ok(vec![row.clone()]));
        mock.expect_find_matching_direct_grants()
            .times(1)
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let input = fx.input("documents", "write");
        assert!(resolver.check_permission(&input, CheckOptions::default()).await.unwrap());
        assert!(resolver.check_permission(&input, CheckOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_sources_denies() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        mock.expect_find_role_granted_permissions()
            .returning(|_| Ok(vec![]));
        mock.expect_find_matching_direct_grants()
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let decision = resolver
            .decide(&fx.input("documents", "delete"), CheckOptions::default())
            .await;
        assert_eq!(decision, AccessDecision::denied(DecisionOutcome::NoGrant));
    }

    #[tokio::test]
    async fn test_non_member_is_denied_without_grant_reads() {
        let fx = Fixture::new();
        let mut mock = MockPermissionStore::new();
        mock.expect_find_active_system_role_assignment()
            .returning(|_, _, _| Ok(None));
        mock.expect_find_membership().returning(|_, _| Ok(None));
        mock.expect_find_role_granted_permissions().never();
        mock.expect_find_matching_direct_grants().never();

        let resolver = fx.resolver(mock);
        let decision = resolver
            .decide(&fx.input("documents", "read"), CheckOptions::default())
            .await;
        assert_eq!(decision, AccessDecision::denied(DecisionOutcome::NotMember));
    }

    #[tokio::test]
    async fn test_super_admin_skips_tenant_and_membership() {
        let fx = Fixture::new();
        let mut mock = MockPermissionStore::new();
        let super_admin_role = fx.super_admin_role;
        mock.expect_find_active_system_role_assignment()
            .with(eq(fx.principal), eq(super_admin_role), always())
            .returning(|p, r, now| {
                Ok(Some(RoleAssignment {
                    principal_id: p,
                    role_id: r,
                    tenant_id: StringUuid::new_v4(),
                    expires_at: None,
                    granted_at: now,
                    granted_by: None,
                }))
            });
        mock.expect_find_membership().never();

        let resolver = fx.resolver(mock);
        let input = fx.input("anything", "at_all").without_tenant();
        let decision = resolver.decide(&input, CheckOptions::default()).await;
        assert_eq!(decision, AccessDecision::super_admin());
    }

    #[tokio::test]
    async fn test_missing_tenant_is_typed_error() {
        let fx = Fixture::new();
        let mut mock = MockPermissionStore::new();
        mock.expect_find_active_system_role_assignment()
            .returning(|_, _, _| Ok(None));

        let resolver = fx.resolver(mock);
        let input = fx.input("documents", "read").without_tenant();
        let result = resolver.check_permission(&input, CheckOptions::default()).await;
        assert!(matches!(result, Err(AppError::TenantContextMissing)));
    }

    #[tokio::test]
    async fn test_store_failure_denies() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        mock.expect_find_role_granted_permissions()
            .returning(|_| Err(AppError::Internal(anyhow::anyhow!("connection reset"))));
        mock.expect_find_matching_direct_grants()
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let input = fx.input("documents", "write");
        let result = resolver.check_permission(&input, CheckOptions::default()).await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));

        let decision = resolver.decide(&input, CheckOptions::default()).await;
        assert!(!decision.allowed);
        assert_eq!(
            decision.outcome,
            DecisionOutcome::Indeterminate {
                code: "STORE_UNAVAILABLE".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_instance_scoped_grant() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        let row = fx.direct_row("reports", "read", Some("q3"));
        mock.expect_find_role_granted_permissions()
            .returning(|_| Ok(vec![]));
        // The store filters by instance; the resolver re-checks the rows it gets
        mock.expect_find_matching_direct_grants()
            .returning(move |_| Ok(vec![row.clone()]));

        let resolver = fx.resolver(mock);
        let q3 = fx.input("reports", "read").with_instance("q3");
        let q4 = fx.input("reports", "read").with_instance("q4");
        let unscoped = fx.input("reports", "read");

        assert!(resolver.check_permission(&q3, CheckOptions::default()).await.unwrap());
        assert!(!resolver.check_permission(&q4, CheckOptions::default()).await.unwrap());
        assert!(!resolver.check_permission(&unscoped, CheckOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_rows_are_ignored() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        let mut expired = fx.role_row("documents", "write");
        expired.assignment_expires_at = Some(fx.now - ChronoDuration::seconds(1));
        mock.expect_find_role_granted_permissions()
            .returning(move |_| Ok(vec![expired.clone()]));
        mock.expect_find_matching_direct_grants()
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let allowed = resolver
            .check_permission(&fx.input("documents", "write"), CheckOptions::default())
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let fx = Fixture::new();
        let resolver = fx.resolver(MockPermissionStore::new());
        let result = resolver
            .check_permission(&fx.input("", "write"), CheckOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_effective_permissions_union() {
        let fx = Fixture::new();
        let mut mock = member_store(&fx);
        let role_rows = vec![
            fx.role_row("documents", "write"),
            fx.role_row("documents", "read"),
        ];
        let direct_rows = vec![
            fx.direct_row("documents", "read", None),
            fx.direct_row("reports", "read", Some("q3")),
        ];
        mock.expect_list_role_granted_permissions()
            .times(1)
            .returning(move |_, _, _| Ok(role_rows.clone()));
        mock.expect_list_direct_grant_permissions()
            .times(1)
            .returning(move |_, _, _| Ok(direct_rows.clone()));

        let resolver = fx.resolver(mock);
        let effective = resolver
            .effective_permissions(fx.principal, Some(fx.tenant), CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(
            effective.permissions,
            vec![
                PermissionKey::new("documents", "read"),
                PermissionKey::new("documents", "write"),
            ]
        );
        assert_eq!(effective.instance_grants.len(), 1);
        assert!(!effective.super_admin);

        // Cached: the store expectations above allow a single read each
        let again = resolver
            .effective_permissions(fx.principal, Some(fx.tenant), CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(again, effective);
    }

    #[tokio::test]
    async fn test_cached_grant_does_not_survive_membership_removal() {
        let fx = Fixture::new();
        let mut mock = MockPermissionStore::new();
        mock.expect_find_active_system_role_assignment()
            .returning(|_, _, _| Ok(None));
        let mut seq = mockall::Sequence::new();
        mock.expect_find_membership()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|p, t| Ok(Some(TenantMembership::new(p, t, true))));
        mock.expect_find_membership()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        let row = fx.role_row("documents", "write");
        mock.expect_find_role_granted_permissions()
            .times(1)
            .returning(move |_| Ok(vec![row.clone()]));
        mock.expect_find_matching_direct_grants()
            .times(1)
            .returning(|_| Ok(vec![]));

        let resolver = fx.resolver(mock);
        let input = fx.input("documents", "write");
        assert_eq!(
            resolver.decide(&input, CheckOptions::default()).await,
            AccessDecision::granted()
        );
        assert_eq!(
            resolver.decide(&input, CheckOptions::default()).await,
            AccessDecision::denied(DecisionOutcome::NotMember)
        );
    }

    #[test]
    fn test_latest_expiry() {
        let now = Utc::now();
        let soon = now + ChronoDuration::seconds(10);
        let later = now + ChronoDuration::seconds(60);

        assert_eq!(latest_expiry(vec![Some(soon), Some(later)].into_iter()), Some(later));
        assert_eq!(latest_expiry(vec![Some(soon), None].into_iter()), None);
        assert_eq!(latest_expiry(std::iter::empty()), None);
        assert_eq!(ttl_until(now - ChronoDuration::seconds(1), now), Duration::ZERO);
    }

    #[test]
    fn test_check_options_builders() {
        let options = CheckOptions::default()
            .with_timeout(Duration::from_millis(5))
            .bypassing_cache();
        assert_eq!(options.timeout, Some(Duration::from_millis(5)));
        assert!(options.bypass_cache);
    }
}
