//! Business logic layer

pub mod boundary;
pub mod invalidation;
pub mod provisioning;
pub mod resolution;
pub mod role_management;

pub use invalidation::InvalidationCoordinator;
pub use provisioning::ProvisioningService;
pub use resolution::{CheckOptions, Clock, PermissionResolver, SystemClock};
pub use role_management::RoleManagementService;
