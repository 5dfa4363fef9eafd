//! Tenant and membership domain models

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Tenant status. Tenants are never deleted while data references them;
/// they only move between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Archived,
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "archived" => Ok(TenantStatus::Archived),
            _ => Err(format!("Unknown tenant status: {}", s)),
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Suspended => write!(f, "suspended"),
            TenantStatus::Archived => write!(f, "archived"),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for TenantStatus {
    fn decode(
        value: sqlx::mysql::MySqlValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s: String = sqlx::Decode::<'r, sqlx::MySql>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl sqlx::Type<sqlx::MySql> for TenantStatus {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::MySql>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::MySql> for TenantStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<u8>,
    ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Tenant entity: the root isolation boundary
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tenant {
    #[schema(value_type = String)]
    pub id: StringUuid,
    pub name: String,
    pub status: TenantStatus,
}

impl Default for Tenant {
    fn default() -> Self {
        Self {
            id: StringUuid::new_v4(),
            name: String::new(),
            status: TenantStatus::Active,
        }
    }
}

/// Principal-to-tenant association. A principal may only be evaluated
/// inside a tenant it has a row for (SuperAdmin excepted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TenantMembership {
    #[schema(value_type = String)]
    pub principal_id: StringUuid,
    #[schema(value_type = String)]
    pub tenant_id: StringUuid,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

impl TenantMembership {
    pub fn new(principal_id: StringUuid, tenant_id: StringUuid, is_primary: bool) -> Self {
        Self {
            principal_id,
            tenant_id,
            is_primary,
            created_at: Utc::now(),
        }
    }
}
