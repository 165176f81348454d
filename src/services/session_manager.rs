//! Session manager: attach/detach lifecycle across client, colony, and
//! agent, with partial-failure semantics.
//!
//! Attach is strict: every step must succeed before a session record
//! exists. Detach is a lossy, idempotent intent: the store's status
//! update proceeds no matter which earlier step failed, so users can
//! always retire a session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    narrow_to_uprobes, DebugSession, ProbeConfig, SessionFilter, SessionStatus,
};
use crate::domain::ports::{
    AgentConnector, CollectorEventQuery, DebugStore, StartCollectorRequest,
};
use crate::services::coordinator::AgentCoordinator;
use crate::services::registry::AgentRegistry;

/// Probe lifetime when the caller gives none, or one past the cap.
pub const DEFAULT_PROBE_DURATION: Duration = Duration::from_secs(60);

/// Longest probe lifetime a caller may request.
pub const MAX_PROBE_DURATION: Duration = Duration::from_secs(600);

/// Events drained from the collector right before stopping it.
const DETACH_DRAIN_MAX: u32 = 100_000;

/// Inputs to `AttachUprobe`.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub service_name: String,
    pub function_name: String,
    /// Skip discovery and pin the probe to this agent.
    pub agent_id: Option<String>,
    pub duration: Option<Duration>,
    pub config: ProbeConfig,
    pub sdk_addr: Option<String>,
}

/// Outcome of `AttachUprobe`. Recoverable errors ride in the response
/// body with `success = false`; the transport call itself succeeds.
#[derive(Debug, Clone)]
pub struct AttachResponse {
    pub success: bool,
    pub session_id: Option<Uuid>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub error: Option<String>,
}

impl AttachResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            expires_at: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of `DetachUprobe`.
#[derive(Debug, Clone)]
pub struct DetachResponse {
    pub success: bool,
    pub error: Option<String>,
}

/// Clamp a requested probe duration: absent or above the cap resets to
/// the default.
pub fn clamp_probe_duration(requested: Option<Duration>) -> Duration {
    match requested {
        Some(d) if d <= MAX_PROBE_DURATION && !d.is_zero() => d,
        _ => DEFAULT_PROBE_DURATION,
    }
}

pub struct SessionManager {
    registry: Arc<AgentRegistry>,
    coordinator: Arc<AgentCoordinator>,
    connector: Arc<dyn AgentConnector>,
    store: Arc<dyn DebugStore>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<AgentRegistry>,
        coordinator: Arc<AgentCoordinator>,
        connector: Arc<dyn AgentConnector>,
        store: Arc<dyn DebugStore>,
    ) -> Self {
        Self {
            registry,
            coordinator,
            connector,
            store,
        }
    }

    /// Attach a uprobe to one function of one service.
    pub async fn attach_uprobe(&self, request: AttachRequest) -> AttachResponse {
        let agent_id = match request.agent_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => match self
                .coordinator
                .find_agent_for_service(&request.service_name)
                .await
            {
                Ok(id) => id,
                Err(e) => return AttachResponse::failure(e.to_string()),
            },
        };

        let duration = clamp_probe_duration(request.duration);
        let started_at = Utc::now();
        let expires_at = started_at
            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::seconds(60));

        let Some(entry) = self.registry.get(&agent_id).await else {
            return AttachResponse::failure(format!("agent not found: {agent_id}"));
        };

        let client = self.connector.connect(&self.coordinator.agent_addr(&entry));
        let start = StartCollectorRequest {
            agent_id: agent_id.clone(),
            service_name: request.service_name.clone(),
            function_name: request.function_name.clone(),
            duration,
            config: request.config,
            sdk_addr: request.sdk_addr.clone(),
        };

        let response = match client.start_uprobe_collector(&start).await {
            Ok(response) => response,
            Err(e) => return AttachResponse::failure(format!("collector start failed: {e}")),
        };
        if !response.supported {
            return AttachResponse::failure(format!(
                "agent {agent_id} does not support uprobe collection: {}",
                response.error
            ));
        }
        if !response.error.is_empty() {
            return AttachResponse::failure(format!("collector start failed: {}", response.error));
        }

        let session = DebugSession {
            session_id: Uuid::new_v4(),
            collector_id: response.collector_id,
            service_name: request.service_name,
            function_name: request.function_name,
            agent_id,
            sdk_addr: request.sdk_addr,
            started_at,
            expires_at,
            status: SessionStatus::Active,
        };

        if let Err(e) = self.store.insert_debug_session(&session).await {
            return AttachResponse::failure(format!("failed to persist session: {e}"));
        }

        tracing::info!(
            session_id = %session.session_id,
            service = %session.service_name,
            function = %session.function_name,
            agent_id = %session.agent_id,
            "uprobe attached"
        );

        AttachResponse {
            success: true,
            session_id: Some(session.session_id),
            expires_at: Some(expires_at),
            error: None,
        }
    }

    /// Retire a session.
    ///
    /// Drains any remaining collector events into the store, stops the
    /// collector, and marks the session stopped. Every step past the
    /// session lookup is best-effort; the status update always runs.
    pub async fn detach_uprobe(&self, session_id: &str) -> DetachResponse {
        let session = match self.store.get_debug_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return DetachResponse {
                    success: false,
                    error: Some(format!("session not found: {session_id}")),
                }
            }
            Err(e) => {
                return DetachResponse {
                    success: false,
                    error: Some(format!("failed to load session: {e}")),
                }
            }
        };

        match self.registry.get(&session.agent_id).await {
            Some(entry) => {
                self.drain_and_stop(&session, &entry).await;
            }
            None => {
                tracing::warn!(
                    session_id,
                    agent_id = %session.agent_id,
                    "agent missing from registry, stopping session without contact"
                );
            }
        }

        if let Err(e) = self
            .store
            .update_debug_session_status(session_id, SessionStatus::Stopped)
            .await
        {
            tracing::warn!(session_id, error = %e, "failed to mark session stopped");
        }

        DetachResponse {
            success: true,
            error: None,
        }
    }

    /// Final event drain plus collector stop, both tolerated to fail.
    async fn drain_and_stop(&self, session: &DebugSession, entry: &crate::domain::models::AgentEntry) {
        let client = self.connector.connect(&self.coordinator.agent_addr(entry));

        let query = CollectorEventQuery {
            collector_id: session.collector_id.clone(),
            start_time: Some(session.started_at),
            end_time: Some(Utc::now()),
            max_events: DETACH_DRAIN_MAX,
        };
        match client.query_uprobe_events(&query).await {
            Ok(batch) => {
                let events = narrow_to_uprobes(batch.events);
                if !events.is_empty() {
                    let session_id = session.session_id.to_string();
                    match self.store.insert_debug_events(&session_id, &events).await {
                        Ok(inserted) => tracing::info!(
                            session_id = %session.session_id,
                            inserted,
                            "drained collector events on detach"
                        ),
                        Err(e) => tracing::warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "failed to persist drained events"
                        ),
                    }
                }
            }
            Err(e) => tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "failed to drain collector events on detach"
            ),
        }

        if let Err(e) = client.stop_uprobe_collector(&session.collector_id).await {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "failed to stop collector"
            );
        }
    }

    /// List session records from the store. No live agent contact.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> DomainResult<Vec<DebugSession>> {
        self.store.list_debug_sessions(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agent::{MockAgent, MockAgentConnector};
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteDebugStore};
    use crate::domain::models::{AgentEvent, ServiceInfo, UprobeEvent, UprobeEventType};
    use crate::services::registry::AgentRegistration;

    struct Fixture {
        manager: SessionManager,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn DebugStore>,
        agent: Arc<MockAgent>,
    }

    async fn fixture() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let store: Arc<dyn DebugStore> = Arc::new(SqliteDebugStore::new(pool));
        let registry = Arc::new(AgentRegistry::new(store.clone()));

        let agent = MockAgent::with_services(vec![
            ServiceInfo::new("billing", 8080).with_process_id(42),
        ]);
        let connector: Arc<MockAgentConnector> =
            Arc::new(MockAgentConnector::new(agent.clone()));
        let coordinator = Arc::new(AgentCoordinator::new(
            registry.clone(),
            connector.clone(),
            50051,
            Duration::from_millis(500),
        ));

        let manager = SessionManager::new(
            registry.clone(),
            coordinator,
            connector,
            store.clone(),
        );
        Fixture {
            manager,
            registry,
            store,
            agent,
        }
    }

    async fn register_agent(fixture: &Fixture) {
        fixture
            .registry
            .register(AgentRegistration {
                agent_id: "a1".into(),
                name: "host-1".into(),
                mesh_ipv4: "10.0.0.1".into(),
                mesh_ipv6: None,
                services: vec![],
                runtime_context: None,
                protocol_version: 1,
            })
            .await
            .unwrap();
    }

    fn attach_request(duration: Option<Duration>) -> AttachRequest {
        AttachRequest {
            service_name: "billing".into(),
            function_name: "main.Charge".into(),
            agent_id: None,
            duration,
            config: ProbeConfig::default(),
            sdk_addr: None,
        }
    }

    #[test]
    fn test_duration_clamping() {
        assert_eq!(clamp_probe_duration(None), DEFAULT_PROBE_DURATION);
        assert_eq!(
            clamp_probe_duration(Some(Duration::from_secs(900))),
            DEFAULT_PROBE_DURATION
        );
        assert_eq!(
            clamp_probe_duration(Some(Duration::from_secs(0))),
            DEFAULT_PROBE_DURATION
        );
        assert_eq!(
            clamp_probe_duration(Some(Duration::from_secs(120))),
            Duration::from_secs(120)
        );
        assert_eq!(
            clamp_probe_duration(Some(MAX_PROBE_DURATION)),
            MAX_PROBE_DURATION
        );
    }

    #[tokio::test]
    async fn test_attach_resolves_agent_and_persists_session() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        let response = fixture.manager.attach_uprobe(attach_request(None)).await;
        assert!(response.success, "{:?}", response.error);

        let session_id = response.session_id.unwrap().to_string();
        let session = fixture
            .store
            .get_debug_session(&session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.agent_id, "a1");
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.started_at < session.expires_at);
        assert_eq!(fixture.agent.started_collectors().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_overlong_duration_clamps_to_default() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        let response = fixture
            .manager
            .attach_uprobe(attach_request(Some(Duration::from_secs(15 * 60))))
            .await;
        assert!(response.success);

        let session = fixture
            .store
            .get_debug_session(&response.session_id.unwrap().to_string())
            .await
            .unwrap()
            .unwrap();
        let lifetime = session
            .expires_at
            .signed_duration_since(session.started_at)
            .num_seconds();
        assert!((59..=61).contains(&lifetime), "lifetime was {lifetime}s");
    }

    #[tokio::test]
    async fn test_attach_unknown_service_reports_failure() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        let mut request = attach_request(None);
        request.service_name = "ghost".into();
        let response = fixture.manager.attach_uprobe(request).await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("ghost"));
        assert!(response.session_id.is_none());
    }

    #[tokio::test]
    async fn test_attach_unsupported_agent_reports_failure() {
        let fixture = fixture().await;
        register_agent(&fixture).await;
        fixture.agent.set_supported(false);

        let response = fixture.manager.attach_uprobe(attach_request(None)).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("does not support"));
    }

    #[tokio::test]
    async fn test_detach_drains_events_and_stops_collector() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        let response = fixture.manager.attach_uprobe(attach_request(None)).await;
        let session_id = response.session_id.unwrap().to_string();

        fixture.agent.set_events(vec![
            AgentEvent::Uprobe(UprobeEvent {
                timestamp: Utc::now(),
                event_type: UprobeEventType::Return,
                function_name: "main.Charge".into(),
                thread_id: 1,
                process_id: 42,
                duration_ns: 3_000_000,
                arg_payload: None,
                return_payload: None,
            }),
        ]);

        let detach = fixture.manager.detach_uprobe(&session_id).await;
        assert!(detach.success);

        let session = fixture
            .store
            .get_debug_session(&session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(fixture.agent.stopped_collectors().len(), 1);

        let events = fixture.store.get_debug_events(&session_id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_detach_with_unreachable_agent_still_stops() {
        let fixture = fixture().await;

        // Session references an agent the registry has never seen.
        let session = DebugSession {
            session_id: Uuid::new_v4(),
            collector_id: "col-zombie".into(),
            service_name: "billing".into(),
            function_name: "main.Charge".into(),
            agent_id: "missing".into(),
            sdk_addr: None,
            started_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            status: SessionStatus::Active,
        };
        fixture.store.insert_debug_session(&session).await.unwrap();

        let detach = fixture
            .manager
            .detach_uprobe(&session.session_id.to_string())
            .await;
        assert!(detach.success);

        let stored = fixture
            .store
            .get_debug_session(&session.session_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Stopped);
        // No RPC reached the agent.
        assert!(fixture.agent.stopped_collectors().is_empty());
    }

    #[tokio::test]
    async fn test_detach_unknown_session() {
        let fixture = fixture().await;
        let detach = fixture.manager.detach_uprobe(&Uuid::new_v4().to_string()).await;
        assert!(!detach.success);
        assert!(detach.error.unwrap().contains("session not found"));
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        let response = fixture.manager.attach_uprobe(attach_request(None)).await;
        let session_id = response.session_id.unwrap().to_string();

        assert!(fixture.manager.detach_uprobe(&session_id).await.success);
        assert!(fixture.manager.detach_uprobe(&session_id).await.success);

        let session = fixture
            .store
            .get_debug_session(&session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_list_sessions_filters_by_service() {
        let fixture = fixture().await;
        register_agent(&fixture).await;

        fixture.manager.attach_uprobe(attach_request(None)).await;

        let sessions = fixture
            .manager
            .list_sessions(&SessionFilter {
                service_name: Some("billing".into()),
                status: Some(SessionStatus::Active),
            })
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);

        let none = fixture
            .manager
            .list_sessions(&SessionFilter {
                service_name: Some("checkout".into()),
                status: None,
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
