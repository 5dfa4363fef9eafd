//! Permission check API handlers

use crate::api::{MessageResponse, SuccessResponse};
use crate::domain::{AccessDecision, CheckPermissionInput, EffectivePermissions, StringUuid};
use crate::error::Result;
use crate::service::CheckOptions;
use crate::state::HasAuthz;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Body of `POST /api/v1/authz/check`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckRequest {
    #[serde(flatten)]
    pub input: CheckPermissionInput,
    /// Overrides the configured resolution deadline
    pub timeout_ms: Option<u64>,
    /// Read from the store even when a cached answer exists
    #[serde(default)]
    pub bypass_cache: bool,
}

impl CheckRequest {
    fn options(&self) -> CheckOptions {
        options(self.timeout_ms, self.bypass_cache)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct EffectivePermissionsQuery {
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub bypass_cache: bool,
}

fn options(timeout_ms: Option<u64>, bypass_cache: bool) -> CheckOptions {
    let mut options = CheckOptions::default();
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    if bypass_cache {
        options = options.bypassing_cache();
    }
    options
}

/// Decide a single permission check
#[utoipa::path(
    post,
    path = "/api/v1/authz/check",
    tag = "Authorization",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Decision reached", body = AccessDecision),
        (status = 400, description = "Tenant context missing"),
        (status = 422, description = "Malformed request"),
        (status = 503, description = "Store unavailable, access denied"),
        (status = 504, description = "Deadline exceeded, access denied")
    )
)]
pub async fn check<S: HasAuthz>(
    State(state): State<S>,
    Json(request): Json<CheckRequest>,
) -> Result<impl IntoResponse> {
    let decision = state
        .resolver()
        .evaluate(&request.input, request.options())
        .await?;
    Ok(Json(SuccessResponse::new(decision)))
}

/// Everything a principal may do inside a tenant
#[utoipa::path(
    get,
    path = "/api/v1/authz/tenants/{tenant_id}/principals/{principal_id}/permissions",
    tag = "Authorization",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("principal_id" = Uuid, Path, description = "Principal ID"),
        EffectivePermissionsQuery
    ),
    responses(
        (status = 200, description = "Effective permission set", body = EffectivePermissions),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn effective_permissions<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, principal_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<EffectivePermissionsQuery>,
) -> Result<impl IntoResponse> {
    let effective = state
        .resolver()
        .effective_permissions(
            StringUuid::from(principal_id),
            Some(StringUuid::from(tenant_id)),
            options(query.timeout_ms, query.bypass_cache),
        )
        .await?;
    Ok(Json(SuccessResponse::new(effective)))
}

/// Drop every cached answer for a principal in a tenant, on all instances
#[utoipa::path(
    post,
    path = "/api/v1/authz/tenants/{tenant_id}/principals/{principal_id}/invalidate",
    tag = "Authorization",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("principal_id" = Uuid, Path, description = "Principal ID")
    ),
    responses(
        (status = 200, description = "Cache entries evicted", body = MessageResponse),
        (status = 503, description = "Shared cache eviction failed")
    )
)]
pub async fn invalidate<S: HasAuthz>(
    State(state): State<S>,
    Path((tenant_id, principal_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .coordinator()
        .invalidate_principal(StringUuid::from(principal_id), StringUuid::from(tenant_id))
        .await?;
    Ok(Json(MessageResponse::new("Cache invalidated")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_request_flattens_input() {
        let principal = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let json = serde_json::json!({
            "principal_id": principal,
            "tenant_id": tenant,
            "resource": "documents",
            "action": "write",
            "timeout_ms": 50
        });

        let request: CheckRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.input.principal_id, principal);
        assert_eq!(request.input.resource_instance_id, None);
        assert!(!request.bypass_cache);

        let options = request.options();
        assert_eq!(options.timeout, Some(Duration::from_millis(50)));
        assert!(!options.bypass_cache);
    }

    #[test]
    fn test_options_default() {
        let options = options(None, true);
        assert_eq!(options.timeout, None);
        assert!(options.bypass_cache);
    }
}
