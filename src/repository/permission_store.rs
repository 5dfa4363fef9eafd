//! Permission store: the single source of truth for tenants, roles,
//! permissions, assignments and direct grants

use crate::domain::{
    DirectGrant, DirectGrantPermission, Permission, PermissionQuery, PrincipalTenant, Role,
    RoleAssignment, RoleGrantedPermission, StringUuid, Tenant, TenantMembership,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // Tenancy
    async fn find_tenant(&self, id: StringUuid) -> Result<Option<Tenant>>;
    async fn find_membership(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
    ) -> Result<Option<TenantMembership>>;
    async fn add_membership(&self, membership: &TenantMembership) -> Result<()>;

    // Roles and permissions
    async fn find_role_by_id(&self, id: StringUuid) -> Result<Option<Role>>;
    async fn find_role_by_name(&self, tenant_id: StringUuid, name: &str) -> Result<Option<Role>>;
    /// Insert the role and its permission mappings atomically
    async fn create_role(&self, role: &Role, permission_ids: &[StringUuid]) -> Result<()>;
    async fn find_permission_by_id(&self, id: StringUuid) -> Result<Option<Permission>>;
    async fn create_permission(&self, permission: &Permission) -> Result<()>;
    async fn assign_permission_to_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()>;
    /// Returns false when no mapping existed
    async fn remove_permission_from_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<bool>;

    // Role assignments
    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<()>;
    async fn revoke_role(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<bool>;
    /// Active assignment of `principal_id` to the tenant-null system role `role_id`
    async fn find_active_system_role_assignment(
        &self,
        principal_id: StringUuid,
        role_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>>;
    /// Every `(principal, tenant)` pair assigned to the role, expired or not
    async fn find_role_holders(&self, role_id: StringUuid) -> Result<Vec<PrincipalTenant>>;
    /// Pairs with the most recently granted active assignments
    async fn list_recent_principals(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<PrincipalTenant>>;

    // Direct grants
    async fn grant_permission(&self, grant: &DirectGrant) -> Result<()>;
    async fn find_direct_grant(&self, id: StringUuid) -> Result<Option<DirectGrant>>;
    async fn revoke_direct_grant(&self, id: StringUuid) -> Result<bool>;

    // Resolution reads
    /// Active role assignments of the principal in the tenant joined through
    /// role_permissions to permissions matching `(resource, action)`
    async fn find_role_granted_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<RoleGrantedPermission>>;
    /// Active direct grants matching `(resource, action)` whose instance is
    /// null or equal to the requested one
    async fn find_matching_direct_grants(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<DirectGrantPermission>>;
    async fn list_role_granted_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleGrantedPermission>>;
    async fn list_direct_grant_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DirectGrantPermission>>;
}

const ROLE_COLUMNS: &str =
    "id, tenant_id, name, description, is_system_role, created_at, updated_at";

const ROLE_GRANTED_SELECT: &str = r#"
    SELECT DISTINCT ur.role_id, p.id AS permission_id, p.tenant_id AS permission_tenant_id,
           p.resource, p.action, ur.expires_at AS assignment_expires_at
    FROM user_roles ur
    INNER JOIN roles r ON r.id = ur.role_id
    INNER JOIN role_permissions rp ON rp.role_id = ur.role_id
    INNER JOIN permissions p ON p.id = rp.permission_id
    WHERE ur.principal_id = ? AND ur.tenant_id = ?
      AND (ur.expires_at IS NULL OR ur.expires_at > ?)
      AND (r.tenant_id = ur.tenant_id OR r.tenant_id IS NULL)
"#;

const DIRECT_GRANT_SELECT: &str = r#"
    SELECT g.id AS grant_id, g.principal_id, g.tenant_id, g.permission_id,
           p.tenant_id AS permission_tenant_id, p.resource, p.action,
           g.resource_instance_id, g.expires_at
    FROM user_permissions g
    INNER JOIN permissions p ON p.id = g.permission_id
    WHERE g.principal_id = ? AND g.tenant_id = ?
      AND (g.expires_at IS NULL OR g.expires_at > ?)
"#;

pub struct MySqlPermissionStore {
    pool: MySqlPool,
}

impl MySqlPermissionStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for MySqlPermissionStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_tenant(&self, id: StringUuid) -> Result<Option<Tenant>> {
        let tenant =
            sqlx::query_as::<_, Tenant>("SELECT id, name, status FROM tenants WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(tenant)
    }

    async fn find_membership(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
    ) -> Result<Option<TenantMembership>> {
        let membership = sqlx::query_as::<_, TenantMembership>(
            r#"
            SELECT principal_id, tenant_id, is_primary, created_at
            FROM tenant_memberships
            WHERE principal_id = ? AND tenant_id = ?
            "#,
        )
        .bind(principal_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    async fn add_membership(&self, membership: &TenantMembership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_memberships (principal_id, tenant_id, is_primary, created_at)
            VALUES (?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE is_primary = VALUES(is_primary)
            "#,
        )
        .bind(membership.principal_id)
        .bind(membership.tenant_id)
        .bind(membership.is_primary)
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_role_by_id(&self, id: StringUuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE id = ?",
            ROLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn find_role_by_name(&self, tenant_id: StringUuid, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE tenant_id = ? AND name = ?",
            ROLE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn create_role(&self, role: &Role, permission_ids: &[StringUuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO roles (id, tenant_id, name, description, is_system_role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(role.id)
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system_role)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;

        for permission_id in permission_ids {
            sqlx::query("INSERT IGNORE INTO role_permissions (role_id, permission_id) VALUES (?, ?)")
                .bind(role.id)
                .bind(permission_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_permission_by_id(&self, id: StringUuid) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT id, tenant_id, resource, action, description FROM permissions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(permission)
    }

    async fn create_permission(&self, permission: &Permission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (id, tenant_id, resource, action, description)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(permission.id)
        .bind(permission.tenant_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        sqlx::query("INSERT IGNORE INTO role_permissions (role_id, permission_id) VALUES (?, ?)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (principal_id, role_id, tenant_id, expires_at, granted_at, granted_by)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                expires_at = VALUES(expires_at),
                granted_at = VALUES(granted_at),
                granted_by = VALUES(granted_by)
            "#,
        )
        .bind(assignment.principal_id)
        .bind(assignment.role_id)
        .bind(assignment.tenant_id)
        .bind(assignment.expires_at)
        .bind(assignment.granted_at)
        .bind(assignment.granted_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_role(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM user_roles WHERE principal_id = ? AND tenant_id = ? AND role_id = ?",
        )
        .bind(principal_id)
        .bind(tenant_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active_system_role_assignment(
        &self,
        principal_id: StringUuid,
        role_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>> {
        let assignment = sqlx::query_as::<_, RoleAssignment>(
            r#"
            SELECT ur.principal_id, ur.role_id, ur.tenant_id, ur.expires_at, ur.granted_at, ur.granted_by
            FROM user_roles ur
            INNER JOIN roles r ON r.id = ur.role_id
            WHERE ur.principal_id = ? AND ur.role_id = ?
              AND r.is_system_role = TRUE AND r.tenant_id IS NULL
              AND (ur.expires_at IS NULL OR ur.expires_at > ?)
            ORDER BY ur.expires_at IS NULL DESC, ur.expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(principal_id)
        .bind(role_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    async fn find_role_holders(&self, role_id: StringUuid) -> Result<Vec<PrincipalTenant>> {
        let holders = sqlx::query_as::<_, PrincipalTenant>(
            "SELECT DISTINCT principal_id, tenant_id FROM user_roles WHERE role_id = ?",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(holders)
    }

    async fn list_recent_principals(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<PrincipalTenant>> {
        let pairs = sqlx::query_as::<_, PrincipalTenant>(
            r#"
            SELECT principal_id, tenant_id
            FROM user_roles
            WHERE expires_at IS NULL OR expires_at > ?
            GROUP BY principal_id, tenant_id
            ORDER BY MAX(granted_at) DESC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(pairs)
    }

    async fn grant_permission(&self, grant: &DirectGrant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_permissions
                (id, principal_id, permission_id, tenant_id, resource_instance_id, expires_at, granted_at, granted_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                id = VALUES(id),
                expires_at = VALUES(expires_at),
                granted_at = VALUES(granted_at),
                granted_by = VALUES(granted_by)
            "#,
        )
        .bind(grant.id)
        .bind(grant.principal_id)
        .bind(grant.permission_id)
        .bind(grant.tenant_id)
        .bind(&grant.resource_instance_id)
        .bind(grant.expires_at)
        .bind(grant.granted_at)
        .bind(grant.granted_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_direct_grant(&self, id: StringUuid) -> Result<Option<DirectGrant>> {
        let grant = sqlx::query_as::<_, DirectGrant>(
            r#"
            SELECT id, principal_id, permission_id, tenant_id, resource_instance_id,
                   expires_at, granted_at, granted_by
            FROM user_permissions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(grant)
    }

    async fn revoke_direct_grant(&self, id: StringUuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_permissions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_role_granted_permissions(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<RoleGrantedPermission>> {
        let sql = format!("{} AND p.resource = ? AND p.action = ?", ROLE_GRANTED_SELECT);
        let rows = sqlx::query_as::<_, RoleGrantedPermission>(&sql)
            .bind(query.principal_id)
            .bind(query.tenant_id)
            .bind(query.now)
            .bind(&query.resource)
            .bind(&query.action)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn find_matching_direct_grants(
        &self,
        query: &PermissionQuery,
    ) -> Result<Vec<DirectGrantPermission>> {
        let sql = format!(
            "{} AND p.resource = ? AND p.action = ? \
             AND (g.resource_instance_id IS NULL OR g.resource_instance_id = ?)",
            DIRECT_GRANT_SELECT
        );
        let rows = sqlx::query_as::<_, DirectGrantPermission>(&sql)
            .bind(query.principal_id)
            .bind(query.tenant_id)
            .bind(query.now)
            .bind(&query.resource)
            .bind(&query.action)
            .bind(&query.resource_instance_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn list_role_granted_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleGrantedPermission>> {
        let rows = sqlx::query_as::<_, RoleGrantedPermission>(ROLE_GRANTED_SELECT)
            .bind(principal_id)
            .bind(tenant_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn list_direct_grant_permissions(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DirectGrantPermission>> {
        let rows = sqlx::query_as::<_, DirectGrantPermission>(DIRECT_GRANT_SELECT)
            .bind(principal_id)
            .bind(tenant_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
