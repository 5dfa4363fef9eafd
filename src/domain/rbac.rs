//! RBAC (Role-Based Access Control) domain models
//!
//! Roles are flat: a role is a named bundle of permissions with no parent.
//! The effective permission set of a principal is the plain union of what
//! its active role assignments and direct grants reach.

use super::common::StringUuid;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Role {
    #[schema(value_type = String)]
    pub id: StringUuid,
    /// `None` only for system roles
    #[schema(value_type = Option<String>)]
    pub tenant_id: Option<StringUuid>,
    pub name: String,
    pub description: Option<String>,
    pub is_system_role: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Role {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            tenant_id: Some(StringUuid::nil()),
            name: String::new(),
            description: None,
            is_system_role: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Role {
    /// Enforce `is_system_role <=> tenant_id IS NULL`.
    pub fn validate_scope(&self) -> Result<()> {
        match (self.is_system_role, self.tenant_id) {
            (true, None) | (false, Some(_)) => Ok(()),
            (true, Some(_)) => Err(AppError::Validation(format!(
                "System role {} must not belong to a tenant",
                self.id
            ))),
            (false, None) => Err(AppError::Validation(format!(
                "Role {} must belong to a tenant",
                self.id
            ))),
        }
    }
}

/// Atomic `(resource, action)` capability. No wildcard matching.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, FromRow, ToSchema,
)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// Permission entity, unique per `(tenant_id, resource, action)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Permission {
    #[schema(value_type = String)]
    pub id: StringUuid,
    #[schema(value_type = String)]
    pub tenant_id: StringUuid,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

impl Default for Permission {
    fn default() -> Self {
        Self {
            id: StringUuid::new_v4(),
            tenant_id: StringUuid::nil(),
            resource: String::new(),
            action: String::new(),
            description: None,
        }
    }
}

impl Permission {
    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.resource.clone(), self.action.clone())
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }
}

/// Role-Permission mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RolePermission {
    pub role_id: StringUuid,
    pub permission_id: StringUuid,
}

/// Principal-to-role link inside a tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RoleAssignment {
    #[schema(value_type = String)]
    pub principal_id: StringUuid,
    #[schema(value_type = String)]
    pub role_id: StringUuid,
    #[schema(value_type = String)]
    pub tenant_id: StringUuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub granted_by: Option<StringUuid>,
}

impl RoleAssignment {
    /// An assignment whose expiry is at or before `now` is inert.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Permission assigned straight to a principal, optionally pinned to one
/// resource instance
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DirectGrant {
    #[schema(value_type = String)]
    pub id: StringUuid,
    #[schema(value_type = String)]
    pub principal_id: StringUuid,
    #[schema(value_type = String)]
    pub permission_id: StringUuid,
    #[schema(value_type = String)]
    pub tenant_id: StringUuid,
    /// `None` means "any instance"
    pub resource_instance_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub granted_by: Option<StringUuid>,
}

impl DirectGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    pub fn covers_instance(&self, requested: Option<&str>) -> bool {
        grant_covers_instance(self.resource_instance_id.as_deref(), requested)
    }
}

/// Direct grant joined with the permission it points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DirectGrantPermission {
    pub grant_id: StringUuid,
    pub principal_id: StringUuid,
    pub tenant_id: StringUuid,
    pub permission_id: StringUuid,
    pub permission_tenant_id: StringUuid,
    pub resource: String,
    pub action: String,
    pub resource_instance_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DirectGrantPermission {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    pub fn covers_instance(&self, requested: Option<&str>) -> bool {
        grant_covers_instance(self.resource_instance_id.as_deref(), requested)
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.resource.clone(), self.action.clone())
    }
}

/// Permission reached through one of the principal's role assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleGrantedPermission {
    pub role_id: StringUuid,
    pub permission_id: StringUuid,
    pub permission_tenant_id: StringUuid,
    pub resource: String,
    pub action: String,
    /// Expiry of the assignment that makes this permission reachable
    pub assignment_expires_at: Option<DateTime<Utc>>,
}

impl RoleGrantedPermission {
    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.resource.clone(), self.action.clone())
    }
}

/// A `(principal, tenant)` pair, the unit of cache invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct PrincipalTenant {
    pub principal_id: StringUuid,
    pub tenant_id: StringUuid,
}

/// Lookup parameters for the resolution reads of the permission store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionQuery {
    pub principal_id: StringUuid,
    pub tenant_id: StringUuid,
    pub resource: String,
    pub action: String,
    pub resource_instance_id: Option<String>,
    /// Rows expiring at or before this instant are ignored
    pub now: DateTime<Utc>,
}

/// A grant scoped to instance X satisfies only a request for X; an unscoped
/// grant satisfies any request, including one without an instance.
pub fn grant_covers_instance(granted: Option<&str>, requested: Option<&str>) -> bool {
    match granted {
        None => true,
        Some(granted) => requested == Some(granted),
    }
}

/// Input for creating a role
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRoleInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub permission_ids: Option<Vec<Uuid>>,
}

/// Input for creating a permission
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionInput {
    #[validate(
        length(min = 1, max = 100),
        custom(function = "validate_permission_identifier")
    )]
    pub resource: String,
    #[validate(
        length(min = 1, max = 100),
        custom(function = "validate_permission_identifier")
    )]
    pub action: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

/// Resource and action names: lowercase, starting with a letter
fn validate_permission_identifier(value: &str) -> std::result::Result<(), validator::ValidationError> {
    if PERMISSION_IDENTIFIER_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_permission_identifier"))
    }
}

/// Input for assigning a role to a principal in a tenant
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AssignRoleInput {
    pub principal_id: Uuid,
    pub role_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for granting a permission directly to a principal
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct GrantPermissionInput {
    pub principal_id: Uuid,
    pub permission_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub resource_instance_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

lazy_static::lazy_static! {
    pub static ref PERMISSION_IDENTIFIER_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-z][a-z0-9_\-]*$").unwrap();
}
