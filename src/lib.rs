//! Gatekeeper Core - Permission Resolution Engine
//!
//! Answers "may principal P perform action A on resource R inside tenant T?"
//! from tenant-scoped roles and direct grants, behind a two-tier cache that
//! is kept consistent by event-driven invalidation.

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod openapi;
pub mod repository;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
