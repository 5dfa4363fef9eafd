//! Shared fixtures for integration tests: an in-memory permission store with
//! failure and latency injection, a settable clock, and a broken cache tier.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::cache::{CacheHit, CacheKey, CacheTier, CachedValue, LocalCacheTier, TieredCache};
use gatekeeper_core::config::ResolutionConfig;
use gatekeeper_core::domain::{
    DirectGrant, DirectGrantPermission, Permission, PermissionQuery, PrincipalTenant, Role,
    RoleAssignment, RoleGrantedPermission, StringUuid, Tenant, TenantMembership,
};
use gatekeeper_core::error::{AppError, Result};
use gatekeeper_core::repository::PermissionStore;
use gatekeeper_core::service::{
    Clock, InvalidationCoordinator, PermissionResolver, ProvisioningService,
    RoleManagementService,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct Tables {
    tenants: HashMap<StringUuid, Tenant>,
    memberships: HashMap<(StringUuid, StringUuid), TenantMembership>,
    roles: HashMap<StringUuid, Role>,
    permissions: HashMap<StringUuid, Permission>,
    role_permissions: BTreeSet<(StringUuid, StringUuid)>,
    assignments: Vec<RoleAssignment>,
    grants: HashMap<StringUuid, DirectGrant>,
}

/// Mirrors `MySqlPermissionStore` semantics over hash maps
#[derive(Default)]
pub struct TestPermissionStore {
    tables: RwLock<Tables>,
    fail_reads: AtomicBool,
    fail_holder_lookup: AtomicBool,
    latency_ms: AtomicU64,
    reads: AtomicUsize,
}

impl TestPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read fails as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_reads.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_holder_lookup_failing(&self, failing: bool) {
        self.fail_holder_lookup.store(failing, Ordering::SeqCst);
    }

    /// Delay applied before every read
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of reads served so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn read(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    // ---- seeding ----

    pub async fn seed_tenant(&self, name: &str) -> StringUuid {
        let tenant = Tenant {
            name: name.to_string(),
            ..Default::default()
        };
        let id = tenant.id;
        self.tables.write().await.tenants.insert(id, tenant);
        id
    }

    pub async fn seed_member(&self, principal_id: StringUuid, tenant_id: StringUuid) {
        self.tables.write().await.memberships.insert(
            (principal_id, tenant_id),
            TenantMembership::new(principal_id, tenant_id, false),
        );
    }

    pub async fn remove_member(&self, principal_id: StringUuid, tenant_id: StringUuid) {
        self.tables
            .write()
            .await
            .memberships
            .remove(&(principal_id, tenant_id));
    }

    pub async fn seed_permission(&self, tenant_id: StringUuid, resource: &str, action: &str) -> StringUuid {
        let permission = Permission {
            tenant_id,
            resource: resource.to_string(),
            action: action.to_string(),
            ..Default::default()
        };
        let id = permission.id;
        self.tables.write().await.permissions.insert(id, permission);
        id
    }

    /// Tenant role holding `(resource, action)` permissions of that tenant
    pub async fn seed_role(
        &self,
        tenant_id: StringUuid,
        name: &str,
        permissions: &[(&str, &str)],
    ) -> StringUuid {
        let role = Role {
            tenant_id: Some(tenant_id),
            name: name.to_string(),
            ..Default::default()
        };
        let role_id = role.id;
        self.tables.write().await.roles.insert(role_id, role);

        for (resource, action) in permissions {
            let permission_id = self.seed_permission(tenant_id, resource, action).await;
            self.map_permission(role_id, permission_id).await;
        }
        role_id
    }

    pub async fn seed_system_role(&self, role_id: StringUuid, name: &str) {
        let role = Role {
            id: role_id,
            tenant_id: None,
            name: name.to_string(),
            is_system_role: true,
            ..Default::default()
        };
        self.tables.write().await.roles.insert(role_id, role);
    }

    pub async fn map_permission(&self, role_id: StringUuid, permission_id: StringUuid) {
        self.tables
            .write()
            .await
            .role_permissions
            .insert((role_id, permission_id));
    }

    pub async fn seed_assignment(
        &self,
        principal_id: StringUuid,
        role_id: StringUuid,
        tenant_id: StringUuid,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let assignment = RoleAssignment {
            principal_id,
            role_id,
            tenant_id,
            expires_at,
            granted_at: Utc::now(),
            granted_by: None,
        };
        upsert_assignment(&mut self.tables.write().await.assignments, assignment);
    }

    pub async fn seed_grant(
        &self,
        principal_id: StringUuid,
        permission_id: StringUuid,
        tenant_id: StringUuid,
        resource_instance_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StringUuid {
        let grant = DirectGrant {
            id: StringUuid::new_v4(),
            principal_id,
            permission_id,
            tenant_id,
            resource_instance_id: resource_instance_id.map(String::from),
            expires_at,
            granted_at: Utc::now(),
            granted_by: None,
        };
        let id = grant.id;
        self.tables.write().await.grants.insert(id, grant);
        id
    }

    // ---- joins ----

    fn role_rows(
        tables: &Tables,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Vec<RoleGrantedPermission> {
        let mut rows = Vec::new();
        for assignment in tables.assignments.iter().filter(|a| {
            a.principal_id == principal_id && a.tenant_id == tenant_id && a.is_active(now)
        }) {
            let Some(role) = tables.roles.get(&assignment.role_id) else {
                continue;
            };
            if role.tenant_id.is_some_and(|t| t != assignment.tenant_id) {
                continue;
            }
            for (_, permission_id) in tables
                .role_permissions
                .iter()
                .filter(|(role_id, _)| *role_id == assignment.role_id)
            {
                if let Some(permission) = tables.permissions.get(permission_id) {
                    rows.push(RoleGrantedPermission {
                        role_id: assignment.role_id,
                        permission_id: permission.id,
                        permission_tenant_id: permission.tenant_id,
                        resource: permission.resource.clone(),
                        action: permission.action.clone(),
                        assignment_expires_at: assignment.expires_at,
                    });
                }
            }
        }
        rows
    }

    fn grant_rows(
        tables: &Tables,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Vec<DirectGrantPermission> {
        tables
            .grants
            .values()
            .filter(|g| g.principal_id == principal_id && g.tenant_id == tenant_id && g.is_active(now))
            .filter_map(|g| {
                let permission = tables.permissions.get(&g.permission_id)?;
                Some(DirectGrantPermission {
                    grant_id: g.id,
                    principal_id: g.principal_id,
                    tenant_id: g.tenant_id,
                    permission_id: permission.id,
                    permission_tenant_id: permission.tenant_id,
                    resource: permission.resource.clone(),
                    action: permission.action.clone(),
                    resource_instance_id: g.resource_instance_id.clone(),
                    expires_at: g.expires_at,
                })
            })
            .collect()
    }
}

fn upsert_assignment(assignments: &mut Vec<RoleAssignment>, assignment: RoleAssignment) {
    assignments.retain(|a| {
        !(a.principal_id == assignment.principal_id
            && a.role_id == assignment.role_id
            && a.tenant_id == assignment.tenant_id)
    });
    assignments.push(assignment);
}

#[async_trait]
impl PermissionStore for TestPermissionStore {
    async fn ping(&self) -> Result<()> {
        self.read().await
    }

    async fn find_tenant(&self, id: StringUuid) -> Result<Option<Tenant>> {
        self.read().await?;
        Ok(self.tables.read().await.tenants.get(&id).cloned())
    }

    async fn find_membership(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
    ) -> Result<Option<TenantMembership>> {
        self.read().await?;
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .get(&(principal_id, tenant_id))
            .cloned())
    }

    async fn add_membership(&self, membership: &TenantMembership) -> Result<()> {
        self.tables.write().await.memberships.insert(
            (membership.principal_id, membership.tenant_id),
            membership.clone(),
        );
        Ok(())
    }

    async fn find_role_by_id(&self, id: StringUuid) -> Result<Option<Role>> {
        self.read().await?;
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, tenant_id: StringUuid, name: &str) -> Result<Option<Role>> {
        self.read().await?;
        Ok(self
            .tables
            .read()
            .await
            .roles
            .values()
            .find(|r| r.tenant_id == Some(tenant_id) && r.name == name)
            .cloned())
    }

    async fn create_role(&self, role: &Role, permission_ids: &[StringUuid]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.roles.insert(role.id, role.clone());
        for permission_id in permission_ids {
            tables.role_permissions.insert((role.id, *permission_id));
        }
        Ok(())
    }

    async fn find_permission_by_id(&self, id: StringUuid) -> Result<Option<Permission>> {
        self.read().await?;
        Ok(self.tables.read().await.permissions.get(&id).cloned())
    }

    async fn create_permission(&self, permission: &Permission) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.permissions.values().any(|p| {
            p.tenant_id == permission.tenant_id
                && p.resource == permission.resource
                && p.action == permission.action
        }) {
            return Err(AppError::Conflict(format!(
                "Permission {} already exists",
                permission.key()
            )));
        }
        tables.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        self.map_permission(role_id, permission_id).await;
        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .role_permissions
            .remove(&(role_id, permission_id)))
    }

    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<()> {
        upsert_assignment(&mut self.tables.write().await.assignments, assignment.clone());
        Ok(())
    }

    async fn revoke_role(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.assignments.len();
        tables.assignments.retain(|a| {
            !(a.principal_id == principal_id && a.tenant_id == tenant_id && a.role_id == role_id)
        });
        Ok(tables.assignments.len() < before)
    }

    async fn find_active_system_role_assignment(
        &self,
        principal_id: StringUuid,
        role_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>> {
        self.read().await?;
        let tables = self.tables.read().await;
        let is_system = tables
            .roles
            .get(&role_id)
            .is_some_and(|r| r.is_system_role && r.tenant_id.is_none());
        if !is_system {
            return Ok(None);
        }
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.principal_id == principal_id && a.role_id == role_id && a.is_active(now))
            .max_by_key(|a| a.expires_at.map_or(i64::MAX, |e| e.timestamp_millis()))
            .cloned())
    }

    async fn find_role_holders(&self, role_id: StringUuid) -> Result<Vec<PrincipalTenant>> {
        self.read().await?;
        if self.fail_holder_lookup.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let holders: BTreeSet<_> = self
            .tables
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.role_id == role_id)
            .map(|a| (a.principal_id, a.tenant_id))
            .collect();
        Ok(holders
            .into_iter()
            .map(|(principal_id, tenant_id)| PrincipalTenant {
                principal_id,
                tenant_id,
            })
            .collect())
    }

    async fn list_recent_principals(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<PrincipalTenant>> {
        self.read().await?;
        let tables = self.tables.read().await;
        let mut active: Vec<_> = tables.assignments.iter().filter(|a| a.is_active(now)).collect();
        active.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));

        let mut pairs: Vec<PrincipalTenant> = Vec::new();
        for a in active {
            let pair = PrincipalTenant {
                principal_id: a.principal_id,
                tenant_id: a.tenant_id,
            };
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        pairs.truncate(limit as usize);
        Ok(pairs)
    }

    async fn grant_permission(&self, grant: &DirectGrant) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.grants.retain(|_, g| {
            !(g.principal_id == grant.principal_id
                && g.permission_id == grant.permission_id
                && g.tenant_id == grant.tenant_id
                && g.resource_instance_id == grant.resource_instance_id)
        });
        tables.grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn find_direct_grant(&self, id: StringUuid) -> Result<Option<DirectGrant>> {
        self.read().await?;
        Ok(self.tables.read().await.grants.get(&id).cloned())
    }

    async fn revoke_direct_grant(&self, id: StringUuid) -> Result<bool> {
        Ok(self.tables.write().await.grants.remove(&id).is_some())
    }

    async fn find_role_granted_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<RoleGrantedPermission>> {
        self.read().await?;
        let tables = self.tables.read().await;
        Ok(Self::role_rows(&tables, query.principal_id, query.tenant_id, query.now)
            .into_iter()
            .filter(|row| row.resource == query.resource && row.action == query.action)
            .collect())
    }

    async fn find_matching_direct_grants(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<DirectGrantPermission>> {
        self.read().await?;
        let tables = self.tables.read().await;
        Ok(Self::grant_rows(&tables, query.principal_id, query.tenant_id, query.now)
            .into_iter()
            .filter(|row| {
                row.resource == query.resource
                    && row.action == query.action
                    && (row.resource_instance_id.is_none()
                        || row.resource_instance_id == query.resource_instance_id)
            })
            .collect())
    }

    async fn list_role_granted_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleGrantedPermission>> {
        self.read().await?;
        let tables = self.tables.read().await;
        Ok(Self::role_rows(&tables, principal_id, tenant_id, now))
    }

    async fn list_direct_grant_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DirectGrantPermission>> {
        self.read().await?;
        let tables = self.tables.read().await;
        Ok(Self::grant_rows(&tables, principal_id, tenant_id, now))
    }
}

// ============================================================================
// Clock and cache tiers
// ============================================================================

/// Clock that only moves when told to
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Shared tier that is always down
pub struct FailingCacheTier;

#[async_trait]
impl CacheTier for FailingCacheTier {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheHit>> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: CachedValue, _ttl: Duration) -> Result<()> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }

    async fn invalidate_prefix(&self, _prefix: &str) -> Result<()> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }

    async fn clear(&self) -> Result<()> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(AppError::CacheUnavailable("connection refused".to_string()))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const NAMESPACE: &str = "test:authz";

pub fn resolution_config(super_admin_role_id: StringUuid) -> ResolutionConfig {
    ResolutionConfig {
        super_admin_role_id: *super_admin_role_id,
        default_timeout_ms: 1_000,
        default_role_name: Some("member".to_string()),
        role_fanout_limit: 100,
    }
}

pub fn local_cache() -> Arc<TieredCache> {
    Arc::new(TieredCache::local_only(
        Arc::new(LocalCacheTier::new(10_000, Duration::from_secs(300))),
        Duration::from_secs(300),
    ))
}

/// Every service wired around one in-memory store and one cache
pub struct Harness {
    pub store: Arc<TestPermissionStore>,
    pub cache: Arc<TieredCache>,
    pub keys: CacheKey,
    pub clock: Arc<TestClock>,
    pub super_admin_role_id: StringUuid,
    pub resolver: PermissionResolver<TestPermissionStore>,
    pub coordinator: Arc<InvalidationCoordinator<TestPermissionStore>>,
    pub roles: RoleManagementService<TestPermissionStore>,
    pub provisioning: ProvisioningService<TestPermissionStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_cache(local_cache()).await
    }

    pub async fn with_cache(cache: Arc<TieredCache>) -> Self {
        Self::build(Arc::new(TestPermissionStore::new()), cache).await
    }

    /// A second instance over the same store, with its own cache
    pub async fn peer(&self, cache: Arc<TieredCache>) -> Self {
        Self::build(self.store.clone(), cache).await
    }

    async fn build(store: Arc<TestPermissionStore>, cache: Arc<TieredCache>) -> Self {
        let super_admin_role_id = StringUuid::from(uuid::Uuid::from_u128(0x5a));
        store.seed_system_role(super_admin_role_id, "super_admin").await;

        let keys = CacheKey::new(NAMESPACE);
        let clock = Arc::new(TestClock::new(Utc::now()));
        let config = resolution_config(super_admin_role_id);

        let coordinator = Arc::new(InvalidationCoordinator::new(
            store.clone(),
            cache.clone(),
            keys.clone(),
            None,
            config.role_fanout_limit,
        ));
        let resolver = PermissionResolver::new(store.clone(), cache.clone(), keys.clone(), &config)
            .with_clock(clock.clone());
        let roles = RoleManagementService::new(store.clone(), coordinator.clone(), super_admin_role_id)
            .with_clock(clock.clone());
        let provisioning =
            ProvisioningService::new(store.clone(), coordinator.clone(), config.default_role_name.clone())
                .with_clock(clock.clone());

        Self {
            store,
            cache,
            keys,
            clock,
            super_admin_role_id,
            resolver,
            coordinator,
            roles,
            provisioning,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Tenant with one member holding a role with the given permissions
    pub async fn member_with_role(
        &self,
        tenant_id: StringUuid,
        role_name: &str,
        permissions: &[(&str, &str)],
    ) -> (StringUuid, StringUuid) {
        let principal_id = StringUuid::new_v4();
        self.store.seed_member(principal_id, tenant_id).await;
        let role_id = self.store.seed_role(tenant_id, role_name, permissions).await;
        self.store
            .seed_assignment(principal_id, role_id, tenant_id, None)
            .await;
        (principal_id, role_id)
    }

    pub async fn make_super_admin(&self, principal_id: StringUuid, home_tenant: StringUuid) {
        self.store
            .seed_assignment(principal_id, self.super_admin_role_id, home_tenant, None)
            .await;
    }
}
