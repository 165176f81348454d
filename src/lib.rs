//! Polyp - debug session orchestrator for a service-mesh colony
//! control plane.
//!
//! Mediates between CLI/API clients and fleet-deployed agents to run
//! ephemeral, function-level dynamic instrumentation:
//! - Agent registry with health classification and startup reload
//! - Session lifecycle (attach/detach) with partial-failure semantics
//! - Dual-source event queries (live agent vs. durable store)
//! - Continuous background event persistence
//! - Batch function profiling and event analytics

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience.
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::Config;
pub use services::Orchestrator;
