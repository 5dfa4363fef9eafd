//! Unified error handling for Gatekeeper Core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
///
/// Every variant resolves to a denial when it escapes a permission check;
/// none of them can be turned into `allowed = true`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// No tenant supplied for a tenant-scoped check
    #[error("Tenant context missing")]
    TenantContextMissing,

    /// Permission store unreachable or failed mid-resolution
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Shared cache tier unreachable
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Caller deadline exceeded before a decision was reached
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Validation(_) => "VALIDATION",
            AppError::TenantContextMissing => "TENANT_CONTEXT_MISSING",
            AppError::StoreUnavailable(_) | AppError::Database(_) => "STORE_UNAVAILABLE",
            AppError::CacheUnavailable(_) | AppError::Redis(_) => "CACHE_UNAVAILABLE",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// True when the error means "could not determine" rather than a
    /// well-formed request that was refused.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable(_)
                | AppError::Database(_)
                | AppError::CacheUnavailable(_)
                | AppError::Redis(_)
                | AppError::Timeout(_)
                | AppError::Internal(_)
        )
    }

    /// Collapse infrastructure failures from the store into `StoreUnavailable`.
    pub fn into_store_error(self) -> AppError {
        match self {
            AppError::Database(e) => AppError::StoreUnavailable(e.to_string()),
            AppError::Internal(e) => AppError::StoreUnavailable(e.to_string()),
            other => other,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code().to_string();
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::TenantContextMissing => (
                StatusCode::BAD_REQUEST,
                "A tenant context is required for this check".to_string(),
            ),
            AppError::Timeout(ms) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("Permission resolution exceeded {}ms", ms),
            ),
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The permission store is unavailable".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The permission store is unavailable".to_string(),
                )
            }
            AppError::CacheUnavailable(msg) => {
                tracing::error!("Cache unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The cache is unavailable".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The cache is unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let details = if self.is_indeterminate() || matches!(self, AppError::TenantContextMissing)
        {
            Some(serde_json::json!({ "allowed": false }))
        } else {
            None
        };

        let body = Json(ErrorResponse {
            error: code,
            message,
            details,
        });

        (status, body).into_response()
    }
}

// Conversion from validation errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::NotFound("Role not found".to_string());
        assert_eq!(err.to_string(), "Not found: Role not found");
        assert_eq!(AppError::Timeout(250).to_string(), "Timed out after 250ms");
    }

    #[test]
    fn test_error_conversion() {
        let err: AppError = anyhow::anyhow!("Something went wrong").into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(
            AppError::TenantContextMissing.code(),
            "TENANT_CONTEXT_MISSING"
        );
        assert_eq!(
            AppError::StoreUnavailable("down".into()).code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(AppError::Timeout(10).code(), "TIMEOUT");
    }

    #[test]
    fn test_indeterminate_classification() {
        assert!(AppError::Timeout(10).is_indeterminate());
        assert!(AppError::StoreUnavailable("x".into()).is_indeterminate());
        assert!(!AppError::TenantContextMissing.is_indeterminate());
        assert!(!AppError::Validation("x".into()).is_indeterminate());
    }

    #[test]
    fn test_into_store_error() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut).into_store_error();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        let err = AppError::NotFound("role".into()).into_store_error();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_timeout_response_status() {
        let response = AppError::Timeout(5).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_tenant_missing_response_status() {
        let response = AppError::TenantContextMissing.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
