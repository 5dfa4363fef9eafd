//! Domain events emitted by role-management operations

use super::common::StringUuid;
use serde::{Deserialize, Serialize};

/// Mutation events that drive cache invalidation and provisioning.
///
/// Events are raised only after the underlying store write has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthzEvent {
    RoleAssignmentChanged {
        principal_id: StringUuid,
        tenant_id: StringUuid,
    },
    DirectGrantChanged {
        principal_id: StringUuid,
        tenant_id: StringUuid,
    },
    RolePermissionChanged {
        role_id: StringUuid,
    },
    PrincipalProvisioned {
        principal_id: StringUuid,
        tenant_id: StringUuid,
    },
}

impl AuthzEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthzEvent::RoleAssignmentChanged { .. } => "role_assignment_changed",
            AuthzEvent::DirectGrantChanged { .. } => "direct_grant_changed",
            AuthzEvent::RolePermissionChanged { .. } => "role_permission_changed",
            AuthzEvent::PrincipalProvisioned { .. } => "principal_provisioned",
        }
    }

    /// The `(principal, tenant)` pair this event touches, when it is that narrow
    pub fn principal_scope(&self) -> Option<(StringUuid, StringUuid)> {
        match self {
            AuthzEvent::RoleAssignmentChanged {
                principal_id,
                tenant_id,
            }
            | AuthzEvent::DirectGrantChanged {
                principal_id,
                tenant_id,
            }
            | AuthzEvent::PrincipalProvisioned {
                principal_id,
                tenant_id,
            } => Some((*principal_id, *tenant_id)),
            AuthzEvent::RolePermissionChanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = AuthzEvent::RolePermissionChanged {
            role_id: "550e8400-e29b-41d4-a716-446655440000".parse().unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "role_permission_changed");
        assert_eq!(json["role_id"], "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_principal_scope() {
        let principal_id = StringUuid::new_v4();
        let tenant_id = StringUuid::new_v4();

        let event = AuthzEvent::DirectGrantChanged {
            principal_id,
            tenant_id,
        };
        assert_eq!(event.principal_scope(), Some((principal_id, tenant_id)));
        assert_eq!(event.name(), "direct_grant_changed");

        let event = AuthzEvent::RolePermissionChanged {
            role_id: StringUuid::new_v4(),
        };
        assert_eq!(event.principal_scope(), None);
    }
}
