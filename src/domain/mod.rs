//! Domain models for Gatekeeper Core

pub mod common;
pub mod decision;
pub mod events;
pub mod rbac;
pub mod tenant;

pub use common::StringUuid;
pub use decision::*;
pub use events::AuthzEvent;
pub use rbac::*;
pub use tenant::*;
