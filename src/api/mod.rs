//! REST API shared utilities (response types, actor extraction)

pub mod authz;
pub mod health;
pub mod roles;

use crate::domain::StringUuid;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Header carrying the identity of the caller performing a mutation
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Message response (for delete, etc.)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Recorded as `granted_by`. Authentication happens upstream of this
/// service; a missing or malformed header just leaves the field empty.
pub(crate) fn extract_actor_id(headers: &HeaderMap) -> Option<StringUuid> {
    headers
        .get(ACTOR_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
