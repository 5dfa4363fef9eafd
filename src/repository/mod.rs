//! Data access layer (Repository pattern)

pub mod permission_store;

pub use permission_store::{MySqlPermissionStore, PermissionStore};

#[cfg(test)]
pub use permission_store::MockPermissionStore;
