//! HTTP adapter exposing the public RPC surface.

pub mod server;

pub use server::{DebugHttpConfig, DebugHttpServer};
