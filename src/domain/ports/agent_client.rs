//! Agent RPC port.
//!
//! The orchestrator talks to per-host agents over the mesh. A connector
//! builds short-lived typed clients from a mesh address; the client
//! surface mirrors the agent's debug RPC service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentEvent, CpuStackSample, FunctionBytes, MemoryStackSample, ProbeConfig, ServiceInfo,
    TypeBytes,
};

/// Request to start a uprobe collector on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCollectorRequest {
    pub agent_id: String,
    pub service_name: String,
    pub function_name: String,
    /// How long the collector should run before self-terminating.
    pub duration: Duration,
    pub config: ProbeConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_addr: Option<String>,
}

/// Agent answer to a collector start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCollectorResponse {
    /// False when the host lacks the capability (no eBPF, no DWARF).
    pub supported: bool,
    pub collector_id: String,
    #[serde(default)]
    pub error: String,
}

/// Query against a live collector's event buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorEventQuery {
    pub collector_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub max_events: u32,
}

/// Batch of carrier-wrapped events from a collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorEventBatch {
    pub events: Vec<AgentEvent>,
    #[serde(default)]
    pub has_more: bool,
}

/// Live CPU profile request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuProfileRequest {
    pub service_name: String,
    pub pid: u32,
    pub duration_seconds: u32,
    pub frequency_hz: u32,
}

/// Live CPU profile response, surfaced as-is to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuProfileResponse {
    pub success: bool,
    pub total_samples: u64,
    pub lost_samples: u64,
    pub samples: Vec<CpuStackSample>,
    #[serde(default)]
    pub error: String,
}

/// Live memory profile request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryProfileRequest {
    pub service_name: String,
    pub pid: u32,
    pub duration_seconds: u32,
    pub sample_rate_bytes: u64,
}

/// Aggregate allocation counters computed agent-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProfileStats {
    pub total_bytes: u64,
    pub total_objects: u64,
}

/// Live memory profile response, surfaced as-is to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProfileResponse {
    pub success: bool,
    pub samples: Vec<MemoryStackSample>,
    #[serde(default)]
    pub stats: MemoryProfileStats,
    #[serde(default)]
    pub top_functions: Vec<FunctionBytes>,
    #[serde(default)]
    pub top_types: Vec<TypeBytes>,
    #[serde(default)]
    pub error: String,
}

/// Typed view of one agent's debug RPC surface.
#[async_trait]
pub trait AgentRpc: Send + Sync {
    /// Services currently visible on the agent host.
    async fn list_services(&self) -> DomainResult<Vec<ServiceInfo>>;

    async fn start_uprobe_collector(
        &self,
        request: &StartCollectorRequest,
    ) -> DomainResult<StartCollectorResponse>;

    /// Stop a collector. Agents tolerate repeated stops.
    async fn stop_uprobe_collector(&self, collector_id: &str) -> DomainResult<()>;

    async fn query_uprobe_events(
        &self,
        query: &CollectorEventQuery,
    ) -> DomainResult<CollectorEventBatch>;

    async fn profile_cpu(&self, request: &CpuProfileRequest) -> DomainResult<CpuProfileResponse>;

    async fn profile_memory(
        &self,
        request: &MemoryProfileRequest,
    ) -> DomainResult<MemoryProfileResponse>;
}

/// Builds typed agent clients from mesh addresses.
///
/// Connecting is cheap; clients are short-lived and per-call deadlines
/// are the caller's responsibility.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, addr: &str) -> Box<dyn AgentRpc>;
}
