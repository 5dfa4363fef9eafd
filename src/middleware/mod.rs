//! HTTP middleware for Gatekeeper Core

pub mod observability;

pub use observability::ObservabilityLayer;
