//! HTTP server exposing the orchestrator's public RPC surface.
//!
//! Response conventions follow the session manager's split: mutation
//! paths (attach, detach, trace) answer 200 with a `success` flag and
//! carry recoverable errors in the body; query paths map domain errors
//! to transport codes (404 for missing entities, 400 for bad input, 500
//! for internal failures).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{
    CpuProfileAggregate, DebugResults, DebugSession, MemoryProfileAggregate, ProbeConfig,
    ProfileReport, SelectionStrategy, ServiceInfo, SessionFilter, SessionStatus, UprobeEvent,
};
use crate::domain::ports::{CpuProfileResponse, MemoryProfileResponse};
use crate::services::orchestrator::{FunctionInsight, Orchestrator};
use crate::services::registry::AgentRegistration;
use crate::services::session_manager::AttachRequest;
use crate::services::query_router::EventQuery;
use crate::services::profiler::ProfileFunctionsRequest;

/// Configuration for the debug HTTP server.
#[derive(Debug, Clone)]
pub struct DebugHttpConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for DebugHttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
            enable_cors: false,
        }
    }
}

/// Error response body for query paths.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_domain_error(err: &DomainError) -> ApiError {
    let (status, code) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "NOT_FOUND")
    } else if matches!(err, DomainError::InvalidArgument(_)) {
        (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
            code: "INVALID_ARGUMENT".to_string(),
        }),
    )
}

// --- agent registration surface -------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    pub mesh_ipv4: String,
    #[serde(default)]
    pub mesh_ipv6: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub runtime_context: Option<serde_json::Value>,
    #[serde(default)]
    pub protocol_version: u32,
}

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub agent_id: String,
    pub name: String,
    pub mesh_ipv4: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_ipv6: Option<String>,
    pub health: String,
    pub registered_at: String,
    pub last_seen: String,
    pub services: Vec<ServiceInfo>,
    pub protocol_version: u32,
}

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<AgentResponse>,
    pub total: usize,
    pub active: usize,
}

// --- session surface -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AttachUprobeRequest {
    pub service_name: String,
    pub function_name: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub capture_args: bool,
    #[serde(default)]
    pub capture_return: bool,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub sdk_addr: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttachUprobeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetachUprobeRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct DetachUprobeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsParams {
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub service_name: String,
    pub function_name: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
}

impl From<&DebugSession> for SessionResponse {
    fn from(session: &DebugSession) -> Self {
        Self {
            session_id: session.session_id,
            service_name: session.service_name.clone(),
            function_name: session.function_name.clone(),
            agent_id: session.agent_id.clone(),
            started_at: session.started_at,
            expires_at: session.expires_at,
            status: session.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryEventsParams {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_events: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct QueryEventsResponse {
    pub events: Vec<UprobeEvent>,
    /// Always false: results are truncated to `max_events` without a
    /// pagination signal.
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct TraceRequestPathRequest {
    pub service_name: String,
    pub http_path: String,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

// --- profiling surface -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProfileFunctionsHttpRequest {
    pub service_name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub max_functions: Option<u32>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProfileCpuHttpRequest {
    pub service_name: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub frequency_hz: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileMemoryHttpRequest {
    pub service_name: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub sample_rate_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub service_name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl HistoryParams {
    /// Default window: the last hour.
    fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end_time.unwrap_or_else(Utc::now);
        let start = self
            .start_time
            .unwrap_or_else(|| end - chrono::Duration::hours(1));
        (start, end)
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryFunctionsParams {
    pub service_name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub include_metrics: bool,
}

#[derive(Debug, Serialize)]
pub struct QueryFunctionsResponse {
    pub functions: Vec<FunctionInsight>,
}

// --- server ----------------------------------------------------------------

struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Debug orchestrator HTTP server.
pub struct DebugHttpServer {
    config: DebugHttpConfig,
    orchestrator: Arc<Orchestrator>,
}

impl DebugHttpServer {
    pub fn new(orchestrator: Arc<Orchestrator>, config: DebugHttpConfig) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    fn build_router(self) -> Router {
        let state = Arc::new(AppState {
            orchestrator: self.orchestrator,
        });

        let app = Router::new()
            .route("/api/v1/agents/register", post(register_agent))
            .route("/api/v1/agents/{agent_id}/heartbeat", post(agent_heartbeat))
            .route("/api/v1/agents", get(list_agents))
            .route("/api/v1/debug/attach", post(attach_uprobe))
            .route("/api/v1/debug/detach", post(detach_uprobe))
            .route("/api/v1/debug/sessions", get(list_sessions))
            .route("/api/v1/debug/sessions/{session_id}/events", get(query_events))
            .route("/api/v1/debug/sessions/{session_id}/results", get(get_results))
            .route("/api/v1/debug/trace-path", post(trace_request_path))
            .route("/api/v1/functions", get(query_functions))
            .route("/api/v1/profile/functions", post(profile_functions))
            .route("/api/v1/profile/cpu", post(profile_cpu))
            .route("/api/v1/profile/cpu/history", get(cpu_history))
            .route("/api/v1/profile/memory", post(profile_memory))
            .route("/api/v1/profile/memory/history", get(memory_history))
            .route("/health", get(health_check))
            .with_state(state);

        if self.config.enable_cors {
            app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }

    /// Start the server and run until the shutdown future resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.build_router();

        tracing::info!("debug orchestrator listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// --- handlers --------------------------------------------------------------

async fn health_check() -> &'static str {
    "OK"
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .register_agent(AgentRegistration {
            agent_id: request.agent_id,
            name: request.name,
            mesh_ipv4: request.mesh_ipv4,
            mesh_ipv6: request.mesh_ipv6,
            services: request.services,
            runtime_context: request.runtime_context,
            protocol_version: request.protocol_version,
        })
        .await
        .map(|()| StatusCode::CREATED)
        .map_err(|e| map_domain_error(&e))
}

async fn agent_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .agent_heartbeat(&agent_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| map_domain_error(&e))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ListAgentsResponse> {
    let registry = state.orchestrator.registry();
    let now = Utc::now();
    let agents: Vec<AgentResponse> = registry
        .list_all()
        .await
        .iter()
        .map(|entry| AgentResponse {
            agent_id: entry.agent_id.clone(),
            name: entry.name.clone(),
            mesh_ipv4: entry.mesh_ipv4.clone(),
            mesh_ipv6: entry.mesh_ipv6.clone(),
            health: entry.health_at(now).as_str().to_string(),
            registered_at: entry.registered_at.to_rfc3339(),
            last_seen: entry.last_seen.to_rfc3339(),
            services: entry.services.clone(),
            protocol_version: entry.protocol_version,
        })
        .collect();

    let active = registry.count_active().await;
    Json(ListAgentsResponse {
        total: agents.len(),
        active,
        agents,
    })
}

async fn attach_uprobe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AttachUprobeRequest>,
) -> Json<AttachUprobeResponse> {
    let response = state
        .orchestrator
        .attach_uprobe(AttachRequest {
            service_name: request.service_name,
            function_name: request.function_name,
            agent_id: request.agent_id,
            duration: request.duration_seconds.map(Duration::from_secs),
            config: ProbeConfig {
                capture_args: request.capture_args,
                capture_return: request.capture_return,
                sample_rate: request.sample_rate.unwrap_or(1.0),
            },
            sdk_addr: request.sdk_addr,
        })
        .await;

    Json(AttachUprobeResponse {
        success: response.success,
        session_id: response.session_id,
        expires_at: response.expires_at,
        error: response.error,
    })
}

async fn detach_uprobe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetachUprobeRequest>,
) -> Json<DetachUprobeResponse> {
    let response = state.orchestrator.detach_uprobe(&request.session_id).await;
    Json(DetachUprobeResponse {
        success: response.success,
        error: response.error,
    })
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListSessionsParams>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            SessionStatus::parse_str(raw)
                .ok_or_else(|| bad_request(format!("unknown session status: {raw}")))?,
        ),
    };

    let sessions = state
        .orchestrator
        .list_debug_sessions(&SessionFilter {
            service_name: params.service_name,
            status,
        })
        .await
        .map_err(|e| map_domain_error(&e))?;

    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

async fn query_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(params): Query<QueryEventsParams>,
) -> Result<Json<QueryEventsResponse>, ApiError> {
    let events = state
        .orchestrator
        .query_uprobe_events(&EventQuery {
            session_id,
            start: params.start_time,
            end: params.end_time,
            max_events: params.max_events,
        })
        .await
        .map_err(|e| map_domain_error(&e))?;

    Ok(Json(QueryEventsResponse {
        events,
        has_more: false,
    }))
}

async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<DebugResults>, ApiError> {
    state
        .orchestrator
        .get_debug_results(&session_id)
        .await
        .map(Json)
        .map_err(|e| map_domain_error(&e))
}

async fn trace_request_path(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TraceRequestPathRequest>,
) -> Json<AttachUprobeResponse> {
    let response = state
        .orchestrator
        .trace_request_path(
            &request.service_name,
            &request.http_path,
            request.duration_seconds.map(Duration::from_secs),
        )
        .await;

    Json(AttachUprobeResponse {
        success: response.success,
        session_id: response.session_id,
        expires_at: response.expires_at,
        error: response.error,
    })
}

async fn query_functions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryFunctionsParams>,
) -> Result<Json<QueryFunctionsResponse>, ApiError> {
    let functions = state
        .orchestrator
        .query_functions(
            &params.service_name,
            &params.query,
            params.max_results.unwrap_or(50),
            params.include_metrics,
        )
        .await
        .map_err(|e| map_domain_error(&e))?;

    Ok(Json(QueryFunctionsResponse { functions }))
}

async fn profile_functions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileFunctionsHttpRequest>,
) -> Result<Json<ProfileReport>, ApiError> {
    let strategy = match request.strategy.as_deref() {
        None | Some("") => SelectionStrategy::All,
        Some(raw) => SelectionStrategy::parse_str(raw)
            .ok_or_else(|| bad_request(format!("unknown strategy: {raw}")))?,
    };

    let report = state
        .orchestrator
        .profile_functions(ProfileFunctionsRequest {
            service_name: request.service_name,
            query: request.query,
            strategy,
            max_functions: request.max_functions,
            duration: request.duration_seconds.map(Duration::from_secs),
            sample_rate: request.sample_rate.unwrap_or(1.0),
            run_async: request.run_async,
        })
        .await;

    Ok(Json(report))
}

async fn profile_cpu(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileCpuHttpRequest>,
) -> Result<Json<CpuProfileResponse>, ApiError> {
    state
        .orchestrator
        .profile_cpu(
            &request.service_name,
            request.duration_seconds,
            request.frequency_hz,
        )
        .await
        .map(Json)
        .map_err(|e| map_domain_error(&e))
}

async fn cpu_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<CpuProfileAggregate>, ApiError> {
    let (start, end) = params.window();
    state
        .orchestrator
        .query_historical_cpu_profile(&params.service_name, start, end)
        .await
        .map(Json)
        .map_err(|e| map_domain_error(&e))
}

async fn profile_memory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileMemoryHttpRequest>,
) -> Result<Json<MemoryProfileResponse>, ApiError> {
    state
        .orchestrator
        .profile_memory(
            &request.service_name,
            request.duration_seconds,
            request.sample_rate_bytes,
        )
        .await
        .map(Json)
        .map_err(|e| map_domain_error(&e))
}

async fn memory_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<MemoryProfileAggregate>, ApiError> {
    let (start, end) = params.window();
    state
        .orchestrator
        .query_historical_memory_profile(&params.service_name, start, end)
        .await
        .map(Json)
        .map_err(|e| map_domain_error(&e))
}
