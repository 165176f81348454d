//! Adapters binding the domain ports to real infrastructure.

pub mod agent;
pub mod functions;
pub mod http;
pub mod sqlite;

pub use functions::HttpFunctionRegistry;
