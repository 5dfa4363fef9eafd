//! Role management: the mutation surface that feeds invalidation
//!
//! Every write checks boundaries against the store (never the cache),
//! commits, and only then raises the event.

use crate::domain::{
    AssignRoleInput, AuthzEvent, CreatePermissionInput, CreateRoleInput, DirectGrant,
    GrantPermissionInput, Permission, Role, RoleAssignment, StringUuid, Tenant,
};
use crate::error::{AppError, Result};
use crate::repository::PermissionStore;
use crate::service::boundary;
use crate::service::invalidation::InvalidationCoordinator;
use crate::service::resolution::{Clock, SystemClock};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

pub struct RoleManagementService<S: PermissionStore> {
    store: Arc<S>,
    coordinator: Arc<InvalidationCoordinator<S>>,
    super_admin_role_id: StringUuid,
    clock: Arc<dyn Clock>,
}

impl<S: PermissionStore> RoleManagementService<S> {
    pub fn new(
        store: Arc<S>,
        coordinator: Arc<InvalidationCoordinator<S>>,
        super_admin_role_id: StringUuid,
    ) -> Self {
        Self {
            store,
            coordinator,
            super_admin_role_id,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ==================== Roles & Permissions ====================

    pub async fn create_role(&self, tenant_id: StringUuid, input: CreateRoleInput) -> Result<Role> {
        input.validate()?;
        self.require_tenant(tenant_id).await?;

        if self
            .store
            .find_role_by_name(tenant_id, &input.name)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "Role '{}' already exists in tenant {}",
                input.name, tenant_id
            )));
        }

        let mut permissions = Vec::new();
        for permission_id in input.permission_ids.iter().flatten() {
            let permission = self
                .require_permission(tenant_id, StringUuid::from(*permission_id))
                .await
                .map_err(|e| match e {
                    AppError::NotFound(msg) => AppError::BadRequest(msg),
                    other => other,
                })?;
            permissions.push(permission);
        }

        let now = Utc::now();
        let role = Role {
            id: StringUuid::new_v4(),
            tenant_id: Some(tenant_id),
            name: input.name,
            description: input.description,
            is_system_role: false,
            created_at: now,
            updated_at: now,
        };
        role.validate_scope()?;

        let permission_ids: Vec<StringUuid> = permissions.iter().map(|p| p.id).collect();
        self.store
            .create_role(&role, &permission_ids)
            .await
            .map_err(conflict_on_duplicate)?;

        tracing::info!(role_id = %role.id, tenant_id = %tenant_id, permissions = permissions.len(), "Role created");
        Ok(role)
    }

    pub async fn create_permission(
        &self,
        tenant_id: StringUuid,
        input: CreatePermissionInput,
    ) -> Result<Permission> {
        input.validate()?;
        self.require_tenant(tenant_id).await?;

        let permission = Permission {
            id: StringUuid::new_v4(),
            tenant_id,
            resource: input.resource,
            action: input.action,
            description: input.description,
        };
        self.store
            .create_permission(&permission)
            .await
            .map_err(conflict_on_duplicate)?;

        tracing::info!(permission = %permission.key(), tenant_id = %tenant_id, "Permission created");
        Ok(permission)
    }

    pub async fn assign_permission_to_role(
        &self,
        tenant_id: StringUuid,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        self.require_tenant_role(tenant_id, role_id).await?;
        self.require_permission(tenant_id, permission_id).await?;

        self.store
            .assign_permission_to_role(role_id, permission_id)
            .await?;
        self.after_commit(AuthzEvent::RolePermissionChanged { role_id })
            .await;
        Ok(())
    }

    pub async fn remove_permission_from_role(
        &self,
        tenant_id: StringUuid,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        self.require_tenant_role(tenant_id, role_id).await?;

        if !self
            .store
            .remove_permission_from_role(role_id, permission_id)
            .await?
        {
            return Err(AppError::NotFound(format!(
                "Permission {} is not mapped to role {}",
                permission_id, role_id
            )));
        }
        self.after_commit(AuthzEvent::RolePermissionChanged { role_id })
            .await;
        Ok(())
    }

    // ==================== Role Assignments ====================

    pub async fn assign_role(
        &self,
        tenant_id: StringUuid,
        input: AssignRoleInput,
        granted_by: Option<StringUuid>,
    ) -> Result<RoleAssignment> {
        input.validate()?;
        let now = self.clock.now();
        if input.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(AppError::Validation(
                "expires_at must be in the future".to_string(),
            ));
        }

        let principal_id = StringUuid::from(input.principal_id);
        let role_id = StringUuid::from(input.role_id);
        self.require_member(principal_id, tenant_id).await?;

        let role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))?;
        if !boundary::role_in_boundary(tenant_id, &role, self.super_admin_role_id) {
            return Err(AppError::Forbidden(format!(
                "Role {} cannot be assigned in tenant {}",
                role_id, tenant_id
            )));
        }

        let assignment = RoleAssignment {
            principal_id,
            role_id,
            tenant_id,
            expires_at: input.expires_at,
            granted_at: now,
            granted_by,
        };
        self.store.assign_role(&assignment).await?;

        tracing::info!(
            principal_id = %principal_id,
            tenant_id = %tenant_id,
            role_id = %role_id,
            "Role assigned"
        );
        self.after_commit(AuthzEvent::RoleAssignmentChanged {
            principal_id,
            tenant_id,
        })
        .await;
        Ok(assignment)
    }

    pub async fn revoke_role(
        &self,
        tenant_id: StringUuid,
        principal_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<()> {
        if !self
            .store
            .revoke_role(principal_id, tenant_id, role_id)
            .await?
        {
            return Err(AppError::NotFound(format!(
                "Principal {} has no assignment to role {} in tenant {}",
                principal_id, role_id, tenant_id
            )));
        }

        tracing::info!(
            principal_id = %principal_id,
            tenant_id = %tenant_id,
            role_id = %role_id,
            "Role revoked"
        );
        self.after_commit(AuthzEvent::RoleAssignmentChanged {
            principal_id,
            tenant_id,
        })
        .await;
        Ok(())
    }

    // ==================== Direct Grants ====================

    pub async fn grant_permission(
        &self,
        tenant_id: StringUuid,
        input: GrantPermissionInput,
        granted_by: Option<StringUuid>,
    ) -> Result<DirectGrant> {
        input.validate()?;
        let now = self.clock.now();
        if input.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(AppError::Validation(
                "expires_at must be in the future".to_string(),
            ));
        }

        let principal_id = StringUuid::from(input.principal_id);
        let permission_id = StringUuid::from(input.permission_id);
        self.require_member(principal_id, tenant_id).await?;
        self.require_permission(tenant_id, permission_id).await?;

        let grant = DirectGrant {
            id: StringUuid::new_v4(),
            principal_id,
            permission_id,
            tenant_id,
            resource_instance_id: input.resource_instance_id,
            expires_at: input.expires_at,
            granted_at: now,
            granted_by,
        };
        self.store.grant_permission(&grant).await?;

        tracing::info!(
            grant_id = %grant.id,
            principal_id = %principal_id,
            tenant_id = %tenant_id,
            "Permission granted"
        );
        self.after_commit(AuthzEvent::DirectGrantChanged {
            principal_id,
            tenant_id,
        })
        .await;
        Ok(grant)
    }

    pub async fn revoke_direct_grant(&self, tenant_id: StringUuid, grant_id: StringUuid) -> Result<()> {
        let grant = self
            .store
            .find_direct_grant(grant_id)
            .await?
            .filter(|grant| boundary::grant_in_boundary(tenant_id, grant))
            .ok_or_else(|| AppError::NotFound(format!("Grant {} not found", grant_id)))?;

        if !self.store.revoke_direct_grant(grant_id).await? {
            return Err(AppError::NotFound(format!("Grant {} not found", grant_id)));
        }

        tracing::info!(grant_id = %grant_id, tenant_id = %tenant_id, "Direct grant revoked");
        self.after_commit(AuthzEvent::DirectGrantChanged {
            principal_id: grant.principal_id,
            tenant_id,
        })
        .await;
        Ok(())
    }

    // ==================== Helpers ====================

    /// The write is already durable; a failed eviction leaves the local tier
    /// clean and the shared tier bounded by its TTL.
    async fn after_commit(&self, event: AuthzEvent) {
        if let Err(e) = self.coordinator.handle(&event).await {
            tracing::warn!(event = event.name(), error = %e, "Cache invalidation incomplete after commit");
        }
    }

    async fn require_tenant(&self, tenant_id: StringUuid) -> Result<Tenant> {
        self.store
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", tenant_id)))
    }

    async fn require_member(&self, principal_id: StringUuid, tenant_id: StringUuid) -> Result<()> {
        let member = boundary::validate_tenant_membership(
            self.store.as_ref(),
            principal_id,
            tenant_id,
            self.super_admin_role_id,
            self.clock.now(),
        )
        .await?;

        if member {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Principal {} is not a member of tenant {}",
                principal_id, tenant_id
            )))
        }
    }

    async fn require_tenant_role(&self, tenant_id: StringUuid, role_id: StringUuid) -> Result<Role> {
        self.store
            .find_role_by_id(role_id)
            .await?
            .filter(|role| role.tenant_id == Some(tenant_id))
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))
    }

    async fn require_permission(
        &self,
        tenant_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<Permission> {
        self.store
            .find_permission_by_id(permission_id)
            .await?
            .filter(|permission| boundary::permission_in_boundary(tenant_id, permission))
            .ok_or_else(|| AppError::NotFound(format!("Permission {} not found", permission_id)))
    }
}

fn conflict_on_duplicate(e: AppError) -> AppError {
    match e {
        AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            AppError::Conflict(db.message().to_string())
        }
        other => other,
    }
}
