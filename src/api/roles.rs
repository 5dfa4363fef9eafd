//! Role, permission, assignment and grant API handlers

use crate::api::{extract_actor_id, MessageResponse, SuccessResponse};
use crate::domain::{
    AssignRoleInput, CreatePermissionInput, CreateRoleInput, DirectGrant, GrantPermissionInput,
    Permission, Role, RoleAssignment, StringUuid,
};
use crate::error::Result;
use crate::state::HasAuthz;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

// ==================== Roles & Permissions ====================

/// Create role
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/roles",
    tag = "Role Management",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = CreateRoleInput,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 404, description = "Tenant not found"),
        (status = 409, description = "Role name taken")
    )
)]
pub async fn create_role<S: HasAuthz>(
    State(state): State<S>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateRoleInput>,
) -> Result<impl IntoResponse> {
    let role = state
        .role_service()
        .create_role(StringUuid::from(tenant_id), input)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(role))))
}

/// Create permission
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/permissions",
    tag = "Role Management",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = CreatePermissionInput,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission already exists")
    )
)]
pub async fn create_permission<S: HasAuthz>(
    State(state): State<S>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreatePermissionInput>,
) -> Result<impl IntoResponse> {
    let permission = state
        .role_service()
        .create_permission(StringUuid::from(tenant_id), input)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(permission))))
}

/// Map a permission into a role
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/roles/{role_id}/permissions/{permission_id}",
    tag = "Role Management",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID")
    ),
    responses(
        (status = 200, description = "Permission mapped", body = MessageResponse),
        (status = 404, description = "Role or permission not found in tenant")
    )
)]
pub async fn assign_permission<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, role_id, permission_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .role_service()
        .assign_permission_to_role(
            StringUuid::from(tenant_id),
            StringUuid::from(role_id),
            StringUuid::from(permission_id),
        )
        .await?;
    Ok(Json(MessageResponse::new("Permission assigned to role")))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{tenant_id}/roles/{role_id}/permissions/{permission_id}",
    tag = "Role Management",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID")
    ),
    responses(
        (status = 200, description = "Permission removed", body = MessageResponse),
        (status = 404, description = "Mapping not found")
    )
)]
pub async fn remove_permission<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, role_id, permission_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .role_service()
        .remove_permission_from_role(
            StringUuid::from(tenant_id),
            StringUuid::from(role_id),
            StringUuid::from(permission_id),
        )
        .await?;
    Ok(Json(MessageResponse::new("Permission removed from role")))
}

// ==================== Assignments & Grants ====================

/// Assign a role to a principal
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/role-assignments",
    tag = "Role Management",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = AssignRoleInput,
    responses(
        (status = 201, description = "Role assigned", body = RoleAssignment),
        (status = 403, description = "Principal not a member, or role outside the tenant"),
        (status = 404, description = "Role not found")
    )
)]
pub async fn assign_role<S: HasAuthz>(
    State(state): State<S>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<AssignRoleInput>,
) -> Result<impl IntoResponse> {
    let assignment = state
        .role_service()
        .assign_role(StringUuid::from(tenant_id), input, extract_actor_id(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(assignment))))
}

/// Revoke a role from a principal
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{tenant_id}/principals/{principal_id}/roles/{role_id}",
    tag = "Role Management",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("principal_id" = Uuid, Path, description = "Principal ID"),
        ("role_id" = Uuid, Path, description = "Role ID")
    ),
    responses(
        (status = 200, description = "Role revoked", body = MessageResponse),
        (status = 404, description = "Assignment not found")
    )
)]
pub async fn revoke_role<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, principal_id, role_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .role_service()
        .revoke_role(
            StringUuid::from(tenant_id),
            StringUuid::from(principal_id),
            StringUuid::from(role_id),
        )
        .await?;
    Ok(Json(MessageResponse::new("Role revoked")))
}

/// Grant a permission directly to a principal
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/grants",
    tag = "Role Management",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = GrantPermissionInput,
    responses(
        (status = 201, description = "Permission granted", body = DirectGrant),
        (status = 403, description = "Principal not a member of the tenant"),
        (status = 404, description = "Permission not found in tenant")
    )
)]
pub async fn grant_permission<S: HasAuthz>(
    State(state): State<S>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<GrantPermissionInput>,
) -> Result<impl IntoResponse> {
    let grant = state
        .role_service()
        .grant_permission(StringUuid::from(tenant_id), input, extract_actor_id(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(grant))))
}

/// Revoke a direct grant
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{tenant_id}/grants/{grant_id}",
    tag = "Role Management",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("grant_id" = Uuid, Path, description = "Grant ID")
    ),
    responses(
        (status = 200, description = "Grant revoked", body = MessageResponse),
        (status = 404, description = "Grant not found in tenant")
    )
)]
pub async fn revoke_grant<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, grant_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .role_service()
        .revoke_direct_grant(StringUuid::from(tenant_id), StringUuid::from(grant_id))
        .await?;
    Ok(Json(MessageResponse::new("Grant revoked")))
}

// ==================== Provisioning ====================

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub is_primary: bool,
}

/// Join a principal to a tenant and assign the default role
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant_id}/principals/{principal_id}/provision",
    tag = "Role Management",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("principal_id" = Uuid, Path, description = "Principal ID")
    ),
    request_body = ProvisionRequest,
    responses(
        (status = 200, description = "Principal provisioned; data is the default-role assignment, if any"),
        (status = 404, description = "Tenant not found")
    )
)]
pub async fn provision<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, principal_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ProvisionRequest>,
) -> Result<impl IntoResponse> {
    let assignment = state
        .provisioning_service()
        .handle_principal_provisioned(
            StringUuid::from(principal_id),
            StringUuid::from(tenant_id),
            request.is_primary,
        )
        .await?;
    Ok(Json(SuccessResponse::new(assignment)))
}
