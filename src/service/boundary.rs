//! Entity boundary: data in tenant A is never visible to, or actionable
//! from, tenant B. The SuperAdmin role is the only tenant-null entity that
//! may cross it.

use crate::domain::{
    DirectGrant, DirectGrantPermission, Permission, Role, RoleGrantedPermission, StringUuid,
};
use crate::error::Result;
use crate::repository::PermissionStore;
use chrono::{DateTime, Utc};

/// True iff a membership row exists for the pair, or the principal holds an
/// active SuperAdmin assignment. Always reads the store.
pub async fn validate_tenant_membership<S: PermissionStore + ?Sized>(
    store: &S,
    principal_id: StringUuid,
    tenant_id: StringUuid,
    super_admin_role_id: StringUuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    if has_membership(store, principal_id, tenant_id).await? {
        return Ok(true);
    }

    let super_admin = store
        .find_active_system_role_assignment(principal_id, super_admin_role_id, now)
        .await?;
    Ok(super_admin.is_some())
}

/// Membership row only, without the SuperAdmin exception
pub async fn has_membership<S: PermissionStore + ?Sized>(
    store: &S,
    principal_id: StringUuid,
    tenant_id: StringUuid,
) -> Result<bool> {
    Ok(store
        .find_membership(principal_id, tenant_id)
        .await?
        .is_some())
}

pub fn permission_in_boundary(tenant_id: StringUuid, permission: &Permission) -> bool {
    permission.tenant_id == tenant_id
}

pub fn grant_in_boundary(tenant_id: StringUuid, grant: &DirectGrant) -> bool {
    grant.tenant_id == tenant_id
}

/// A role is usable in `tenant_id` when it is a tenant role of that tenant,
/// or when it is the system-scoped SuperAdmin role.
pub fn role_in_boundary(tenant_id: StringUuid, role: &Role, super_admin_role_id: StringUuid) -> bool {
    match role.tenant_id {
        Some(role_tenant) => !role.is_system_role && role_tenant == tenant_id,
        None => role.is_system_role && role.id == super_admin_role_id,
    }
}

/// A resolved row that claims to belong to a tenant
pub trait TenantScoped {
    fn in_tenant(&self, tenant_id: StringUuid) -> bool;
    fn describe(&self) -> String;
}

impl TenantScoped for RoleGrantedPermission {
    fn in_tenant(&self, tenant_id: StringUuid) -> bool {
        self.permission_tenant_id == tenant_id
    }

    fn describe(&self) -> String {
        format!("role {} -> permission {}", self.role_id, self.permission_id)
    }
}

impl TenantScoped for DirectGrantPermission {
    fn in_tenant(&self, tenant_id: StringUuid) -> bool {
        self.tenant_id == tenant_id && self.permission_tenant_id == tenant_id
    }

    fn describe(&self) -> String {
        format!("grant {} -> permission {}", self.grant_id, self.permission_id)
    }
}

/// Drop rows from any other tenant so they can never grant access
pub fn retain_in_boundary<T: TenantScoped>(tenant_id: StringUuid, rows: Vec<T>) -> Vec<T> {
    rows.into_iter()
        .filter(|row| {
            let inside = row.in_tenant(tenant_id);
            if !inside {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    row = %row.describe(),
                    "Discarding resolved row outside the tenant boundary"
                );
            }
            inside
        })
        .collect()
}
