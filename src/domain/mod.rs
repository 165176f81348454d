//! Domain layer: models, ports, and errors for the debug orchestrator.

pub mod errors;
pub mod models;
pub mod ports;
