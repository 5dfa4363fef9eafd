//! OpenAPI 3 document assembled from handler annotations and domain schemas

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gatekeeper Core API",
        version = "0.1.0",
        description = "Tenant-scoped permission resolution and role management",
        license(name = "Proprietary"),
        contact(name = "Gatekeeper Team")
    ),
    tags(
        (name = "System", description = "Health, readiness and metrics"),
        (name = "Authorization", description = "Permission checks, effective permissions and cache invalidation"),
        (name = "Role Management", description = "Roles, permissions, assignments, direct grants and provisioning"),
    ),
    components(
        schemas(
            crate::api::MessageResponse,
            crate::api::health::HealthResponse,
            crate::api::health::ReadinessResponse,
            crate::api::authz::CheckRequest,
            crate::api::roles::ProvisionRequest,

            crate::domain::Tenant,
            crate::domain::TenantStatus,
            crate::domain::TenantMembership,
            crate::domain::Role,
            crate::domain::Permission,
            crate::domain::PermissionKey,
            crate::domain::RoleAssignment,
            crate::domain::DirectGrant,
            crate::domain::CreateRoleInput,
            crate::domain::CreatePermissionInput,
            crate::domain::AssignRoleInput,
            crate::domain::GrantPermissionInput,
            crate::domain::CheckPermissionInput,
            crate::domain::AccessDecision,
            crate::domain::DecisionOutcome,
            crate::domain::InstanceGrant,
            crate::domain::EffectivePermissions,
        )
    ),
    paths(
        // ── System ─────────────────────────────────────────────────
        crate::api::health::health,
        crate::api::health::ready,

        // ── Authorization ──────────────────────────────────────────
        crate::api::authz::check,
        crate::api::authz::effective_permissions,
        crate::api::authz::invalidate,

        // ── Role Management ────────────────────────────────────────
        crate::api::roles::create_role,
        crate::api::roles::create_permission,
        crate::api::roles::assign_permission,
        crate::api::roles::remove_permission,
        crate::api::roles::assign_role,
        crate::api::roles::revoke_role,
        crate::api::roles::grant_permission,
        crate::api::roles::revoke_grant,
        crate::api::roles::provision,
    ),
)]
pub struct ApiDoc;

impl ApiDoc {
    pub fn build() -> utoipa::openapi::OpenApi {
        Self::openapi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_is_valid_json() {
        let doc = ApiDoc::build();
        let json = serde_json::to_string_pretty(&doc).expect("should serialize to JSON");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("should be valid JSON");

        assert!(parsed.get("openapi").is_some());
        assert!(parsed.get("paths").is_some());
        assert!(parsed.get("components").is_some());
    }

    #[test]
    fn test_openapi_spec_has_authz_paths() {
        let doc = ApiDoc::build();
        assert!(doc.paths.paths.contains_key("/api/v1/authz/check"));
        assert!(doc
            .paths
            .paths
            .contains_key("/api/v1/tenants/{tenant_id}/grants/{grant_id}"));
    }

    #[test]
    fn test_openapi_spec_has_decision_schema() {
        let doc = ApiDoc::build();
        let schemas = doc.components.as_ref().map(|c| &c.schemas);
        assert!(schemas.is_some_and(|s| s.contains_key("AccessDecision")));
    }
}
