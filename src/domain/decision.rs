//! Permission check requests and decisions

use super::common::StringUuid;
use super::rbac::PermissionKey;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A single access question: may `principal_id` perform `action` on
/// `resource` (optionally one instance of it) inside `tenant_id`?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckPermissionInput {
    pub principal_id: Uuid,
    /// Missing or nil tenant fails with `TENANT_CONTEXT_MISSING`
    pub tenant_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub resource: String,
    #[validate(length(min = 1, max = 100))]
    pub action: String,
    #[validate(length(min = 1, max = 255))]
    pub resource_instance_id: Option<String>,
}

impl CheckPermissionInput {
    pub fn new(
        principal_id: impl Into<Uuid>,
        tenant_id: impl Into<Uuid>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            tenant_id: Some(tenant_id.into()),
            resource: resource.into(),
            action: action.into(),
            resource_instance_id: None,
        }
    }

    pub fn with_instance(mut self, resource_instance_id: impl Into<String>) -> Self {
        self.resource_instance_id = Some(resource_instance_id.into());
        self
    }

    pub fn without_tenant(mut self) -> Self {
        self.tenant_id = None;
        self
    }

    /// Tenant context, treating the nil uuid as absent
    pub fn tenant(&self) -> Option<StringUuid> {
        self.tenant_id
            .filter(|tenant_id| !tenant_id.is_nil())
            .map(StringUuid::from)
    }
}

/// Why a decision came out the way it did. Only `Granted` and `SuperAdmin`
/// carry `allowed = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Granted,
    SuperAdmin,
    /// Fully resolved, no granting source found
    NoGrant,
    /// Principal has no membership in the requested tenant
    NotMember,
    /// Could not determine; carries the error code
    Indeterminate { code: String },
}

/// Final answer handed to callers that must not see errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessDecision {
    pub allowed: bool,
    pub outcome: DecisionOutcome,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            allowed: true,
            outcome: DecisionOutcome::Granted,
        }
    }

    pub fn super_admin() -> Self {
        Self {
            allowed: true,
            outcome: DecisionOutcome::SuperAdmin,
        }
    }

    pub fn denied(outcome: DecisionOutcome) -> Self {
        Self {
            allowed: false,
            outcome,
        }
    }

    pub fn indeterminate(code: impl Into<String>) -> Self {
        Self::denied(DecisionOutcome::Indeterminate { code: code.into() })
    }
}

/// A direct grant pinned to one resource instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct InstanceGrant {
    pub resource: String,
    pub action: String,
    pub resource_instance_id: String,
}

/// Everything a principal may do inside a tenant
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermissions {
    /// Capabilities valid for any instance, sorted and deduplicated
    pub permissions: Vec<PermissionKey>,
    /// Capabilities limited to a single resource instance
    pub instance_grants: Vec<InstanceGrant>,
    /// Set when the principal holds SuperAdmin; every check passes
    pub super_admin: bool,
}

impl EffectivePermissions {
    pub fn allows(&self, resource: &str, action: &str, instance: Option<&str>) -> bool {
        if self.super_admin {
            return true;
        }
        if self
            .permissions
            .iter()
            .any(|key| key.resource == resource && key.action == action)
        {
            return true;
        }
        match instance {
            Some(instance) => self.instance_grants.iter().any(|grant| {
                grant.resource == resource
                    && grant.action == action
                    && grant.resource_instance_id == instance
            }),
            None => false,
        }
    }
}
