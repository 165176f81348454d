//! Orchestrator façade: owns component lifetimes and presents the
//! public RPC surface by delegation.
//!
//! Construction wires the registry, coordinator, session manager, query
//! router, and profiler, then starts the background event persister.
//! `stop` signals the persister; construction must happen on a tokio
//! runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, CpuProfileAggregate, CpuStackSample, DebugResults, DebugSession, DurationStats,
    MemoryProfileAggregate, MemoryStackSample, ProfileReport, SessionFilter, SessionStatus,
    UprobeEvent,
};
use crate::domain::ports::{
    AgentConnector, CpuProfileRequest, CpuProfileResponse, DebugStore, FunctionRegistry,
    MemoryProfileRequest, MemoryProfileResponse,
};
use crate::services::analytics;
use crate::services::coordinator::AgentCoordinator;
use crate::services::event_persister::{EventPersister, PersisterConfig, PersisterHandle};
use crate::services::profiler::{FunctionProfiler, ProfileFunctionsRequest};
use crate::services::query_router::{EventQuery, QueryRouter};
use crate::services::registry::{AgentRegistration, AgentRegistry};
use crate::services::session_manager::{AttachRequest, AttachResponse, DetachResponse, SessionManager};

/// Live CPU profile window default and cap, in seconds.
const CPU_PROFILE_DEFAULT_SECS: u32 = 30;
const CPU_PROFILE_MAX_SECS: u32 = 300;

/// Live CPU profile sampling frequency default and cap, in Hz.
const CPU_PROFILE_DEFAULT_HZ: u32 = 99;
const CPU_PROFILE_MAX_HZ: u32 = 1_000;

/// Memory profile sampling default: one sample per 512 KiB allocated.
const MEMORY_SAMPLE_RATE_BYTES: u64 = 512 * 1024;

/// One function of a service, cross-referenced with live probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInsight {
    pub function_name: String,
    pub service_name: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub has_dwarf: bool,
    pub currently_probed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Live statistics, filled for probed functions when reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<DurationStats>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    coordinator: Arc<AgentCoordinator>,
    sessions: Arc<SessionManager>,
    router: Arc<QueryRouter>,
    profiler: FunctionProfiler,
    functions: Arc<dyn FunctionRegistry>,
    connector: Arc<dyn AgentConnector>,
    store: Arc<dyn DebugStore>,
    persister: PersisterHandle,
}

impl Orchestrator {
    /// Wire the components and start the background persister.
    pub fn new(
        store: Arc<dyn DebugStore>,
        connector: Arc<dyn AgentConnector>,
        functions: Arc<dyn FunctionRegistry>,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new(store.clone()));
        let coordinator = Arc::new(AgentCoordinator::new(
            registry.clone(),
            connector.clone(),
            config.agent.port,
            Duration::from_millis(config.agent.discovery_timeout_ms),
        ));
        let sessions = Arc::new(SessionManager::new(
            registry.clone(),
            coordinator.clone(),
            connector.clone(),
            store.clone(),
        ));
        let router = Arc::new(QueryRouter::new(
            registry.clone(),
            coordinator.clone(),
            connector.clone(),
            store.clone(),
        ));
        let profiler = FunctionProfiler::new(
            functions.clone(),
            sessions.clone(),
            router.clone(),
            store.clone(),
        );

        let persister = EventPersister::new(
            router.clone(),
            store.clone(),
            PersisterConfig::from_settings(&config.persister),
        )
        .spawn();

        Self {
            registry,
            coordinator,
            sessions,
            router,
            profiler,
            functions,
            connector,
            store,
            persister,
        }
    }

    /// Signal the background persister to terminate. Idempotent.
    pub fn stop(&self) {
        self.persister.stop();
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub async fn persister_status(&self) -> crate::services::event_persister::PersisterStatus {
        self.persister.status().await
    }

    // --- session lifecycle -------------------------------------------------

    pub async fn register_agent(&self, registration: AgentRegistration) -> DomainResult<()> {
        self.registry.register(registration).await.map(|_| ())
    }

    pub async fn agent_heartbeat(&self, agent_id: &str) -> DomainResult<()> {
        self.registry.heartbeat(agent_id).await
    }

    pub async fn attach_uprobe(&self, request: AttachRequest) -> AttachResponse {
        self.sessions.attach_uprobe(request).await
    }

    pub async fn detach_uprobe(&self, session_id: &str) -> DetachResponse {
        self.sessions.detach_uprobe(session_id).await
    }

    pub async fn list_debug_sessions(
        &self,
        filter: &SessionFilter,
    ) -> DomainResult<Vec<DebugSession>> {
        self.sessions.list_sessions(filter).await
    }

    // --- queries -----------------------------------------------------------

    pub async fn query_uprobe_events(&self, query: &EventQuery) -> DomainResult<Vec<UprobeEvent>> {
        self.router.query_uprobe_events(query).await
    }

    pub async fn get_debug_results(&self, session_id: &str) -> DomainResult<DebugResults> {
        self.router.get_debug_results(session_id).await
    }

    /// Candidate functions of a service, flagged with live probe state.
    pub async fn query_functions(
        &self,
        service_name: &str,
        query: &str,
        max_results: u32,
        include_metrics: bool,
    ) -> DomainResult<Vec<FunctionInsight>> {
        let candidates = self
            .functions
            .query_functions(service_name, query, max_results)
            .await?;

        let active = self
            .store
            .list_debug_sessions(&SessionFilter {
                service_name: Some(service_name.to_string()),
                status: Some(SessionStatus::Active),
            })
            .await?;

        let mut insights = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let session = active
                .iter()
                .find(|s| s.function_name == candidate.function_name);

            let metrics = match (include_metrics, session) {
                (true, Some(session)) => self
                    .router
                    .get_debug_results(&session.session_id.to_string())
                    .await
                    .map(|r| r.statistics)
                    .ok(),
                _ => None,
            };

            insights.push(FunctionInsight {
                function_name: candidate.function_name,
                service_name: candidate.service_name,
                agent_id: candidate.agent_id,
                package_name: candidate.package_name,
                file_path: candidate.file_path,
                has_dwarf: candidate.has_dwarf,
                currently_probed: session.is_some(),
                session_id: session.map(|s| s.session_id),
                metrics,
            });
        }
        Ok(insights)
    }

    // --- batch profiling ---------------------------------------------------

    pub async fn profile_functions(&self, request: ProfileFunctionsRequest) -> ProfileReport {
        self.profiler.profile_functions(request).await
    }

    /// Attach a uprobe to the handler a request path maps to.
    pub async fn trace_request_path(
        &self,
        service_name: &str,
        http_path: &str,
        duration: Option<Duration>,
    ) -> AttachResponse {
        let function_name = derive_function_from_path(http_path);
        tracing::info!(http_path, function = %function_name, "tracing request path");

        self.sessions
            .attach_uprobe(AttachRequest {
                service_name: service_name.to_string(),
                function_name,
                agent_id: None,
                duration,
                config: crate::domain::models::ProbeConfig::default(),
                sdk_addr: None,
            })
            .await
    }

    // --- live profiling passthroughs ---------------------------------------

    pub async fn profile_cpu(
        &self,
        service_name: &str,
        duration_seconds: Option<u32>,
        frequency_hz: Option<u32>,
    ) -> DomainResult<CpuProfileResponse> {
        let (entry, pid) = self.resolve_profile_target(service_name).await?;
        let client = self.connector.connect(&self.coordinator.agent_addr(&entry));

        client
            .profile_cpu(&CpuProfileRequest {
                service_name: service_name.to_string(),
                pid,
                duration_seconds: clamp_or(duration_seconds, CPU_PROFILE_DEFAULT_SECS, CPU_PROFILE_MAX_SECS),
                frequency_hz: clamp_or(frequency_hz, CPU_PROFILE_DEFAULT_HZ, CPU_PROFILE_MAX_HZ),
            })
            .await
    }

    pub async fn profile_memory(
        &self,
        service_name: &str,
        duration_seconds: Option<u32>,
        sample_rate_bytes: Option<u64>,
    ) -> DomainResult<MemoryProfileResponse> {
        let (entry, pid) = self.resolve_profile_target(service_name).await?;
        let client = self.connector.connect(&self.coordinator.agent_addr(&entry));

        client
            .profile_memory(&MemoryProfileRequest {
                service_name: service_name.to_string(),
                pid,
                duration_seconds: clamp_or(duration_seconds, CPU_PROFILE_DEFAULT_SECS, CPU_PROFILE_MAX_SECS),
                sample_rate_bytes: match sample_rate_bytes {
                    Some(rate) if rate > 0 => rate,
                    _ => MEMORY_SAMPLE_RATE_BYTES,
                },
            })
            .await
    }

    async fn resolve_profile_target(
        &self,
        service_name: &str,
    ) -> DomainResult<(crate::domain::models::AgentEntry, u32)> {
        let agent_id = self.coordinator.find_agent_for_service(service_name).await?;
        let pid = self.coordinator.get_service_pid(&agent_id, service_name).await?;
        let entry = self
            .registry
            .get(&agent_id)
            .await
            .ok_or_else(|| DomainError::AgentNotFound(agent_id))?;
        Ok((entry, pid))
    }

    // --- historical profiling ----------------------------------------------

    pub async fn query_historical_cpu_profile(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<CpuProfileAggregate> {
        let rows = self
            .store
            .query_cpu_profile_summaries(service_name, start, end)
            .await?;
        let merged = analytics::merge_cpu_summaries(rows);

        let mut samples = Vec::with_capacity(merged.len());
        let mut total_samples = 0u64;
        for summary in merged {
            let frames = self.store.decode_stack_frames(&summary.stack_frame_ids).await?;
            total_samples += summary.sample_count;
            samples.push(CpuStackSample {
                frames,
                count: summary.sample_count,
            });
        }

        Ok(CpuProfileAggregate {
            samples,
            total_samples,
        })
    }

    pub async fn query_historical_memory_profile(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<MemoryProfileAggregate> {
        let rows = self
            .store
            .query_memory_profile_summaries(service_name, start, end)
            .await?;
        let merged = analytics::merge_memory_summaries(rows);

        let mut samples = Vec::with_capacity(merged.len());
        let mut total_bytes = 0u64;
        let mut total_objects = 0u64;
        for summary in merged {
            let frames = self.store.decode_stack_frames(&summary.stack_frame_ids).await?;
            total_bytes += summary.alloc_bytes;
            total_objects += summary.alloc_objects;
            samples.push(MemoryStackSample {
                frames,
                alloc_bytes: summary.alloc_bytes,
                alloc_objects: summary.alloc_objects,
            });
        }

        let (top_functions, top_types) = analytics::memory_breakdown(&samples);
        Ok(MemoryProfileAggregate {
            samples,
            total_bytes,
            total_objects,
            top_functions,
            top_types,
        })
    }
}

fn clamp_or(requested: Option<u32>, default: u32, max: u32) -> u32 {
    match requested {
        None | Some(0) => default,
        Some(n) => n.min(max),
    }
}

/// Map an HTTP path to a probable handler function name.
///
/// `/a/b` becomes `main.ProcessA`; an `/api` prefix is skipped, so
/// `/api/x` becomes `main.ProcessX`.
fn derive_function_from_path(http_path: &str) -> String {
    let segment = http_path
        .split('/')
        .filter(|s| !s.is_empty())
        .find(|s| !s.eq_ignore_ascii_case("api"));

    match segment {
        Some(segment) => {
            let mut chars = segment.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
            format!("main.Process{capitalized}")
        }
        None => "main.ProcessRoot".to_string(),
    }
}
