//! Principal provisioning: joins a principal to a tenant and hands out the
//! configured default role.

use crate::domain::{AuthzEvent, RoleAssignment, StringUuid, TenantMembership};
use crate::error::{AppError, Result};
use crate::repository::PermissionStore;
use crate::service::invalidation::InvalidationCoordinator;
use crate::service::resolution::{Clock, SystemClock};
use std::sync::Arc;

pub struct ProvisioningService<S: PermissionStore> {
    store: Arc<S>,
    coordinator: Arc<InvalidationCoordinator<S>>,
    default_role_name: Option<String>,
    clock: Arc<dyn Clock>,
}

impl<S: PermissionStore> ProvisioningService<S> {
    pub fn new(
        store: Arc<S>,
        coordinator: Arc<InvalidationCoordinator<S>>,
        default_role_name: Option<String>,
    ) -> Self {
        Self {
            store,
            coordinator,
            default_role_name,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Idempotent. Returns the default-role assignment when one was made.
    #[tracing::instrument(skip(self))]
    pub async fn handle_principal_provisioned(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        is_primary: bool,
    ) -> Result<Option<RoleAssignment>> {
        self.store
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", tenant_id)))?;

        self.store
            .add_membership(&TenantMembership::new(principal_id, tenant_id, is_primary))
            .await?;

        let assignment = match &self.default_role_name {
            Some(name) => self.assign_default_role(principal_id, tenant_id, name).await,
            None => Ok(None),
        };

        // The membership is committed either way
        let event = AuthzEvent::PrincipalProvisioned {
            principal_id,
            tenant_id,
        };
        if let Err(e) = self.coordinator.handle(&event).await {
            tracing::warn!(error = %e, "Cache invalidation incomplete after provisioning");
        }

        let assignment = assignment?;
        tracing::info!(
            default_role = assignment.is_some(),
            "Principal provisioned into tenant"
        );
        Ok(assignment)
    }

    async fn assign_default_role(
        &self,
        principal_id: StringUuid,
        tenant_id: StringUuid,
        name: &str,
    ) -> Result<Option<RoleAssignment>> {
        let Some(role) = self.store.find_role_by_name(tenant_id, name).await? else {
            tracing::warn!(role = name, "Default role does not exist in tenant, skipping");
            return Ok(None);
        };

        let assignment = RoleAssignment {
            principal_id,
            role_id: role.id,
            tenant_id,
            expires_at: None,
            granted_at: self.clock.now(),
            granted_by: None,
        };
        self.store.assign_role(&assignment).await?;
        Ok(Some(assignment))
    }
}
