//! Application state trait for dependency injection
//!
//! Handlers are generic over `HasAuthz` so the router runs unchanged on
//! the MySQL-backed production state and on test states built around an
//! in-memory store.

use crate::repository::PermissionStore;
use crate::service::{
    InvalidationCoordinator, PermissionResolver, ProvisioningService, RoleManagementService,
};
use std::future::Future;

pub trait HasAuthz: Clone + Send + Sync + 'static {
    type Store: PermissionStore + 'static;

    fn resolver(&self) -> &PermissionResolver<Self::Store>;

    fn coordinator(&self) -> &InvalidationCoordinator<Self::Store>;

    fn role_service(&self) -> &RoleManagementService<Self::Store>;

    fn provisioning_service(&self) -> &ProvisioningService<Self::Store>;

    /// `(store_ok, cache_ok)`
    fn check_ready(&self) -> impl Future<Output = (bool, bool)> + Send;
}
