//! Scriptable in-memory agent, used by tests and local development.
//!
//! The mock plays the agent side of the RPC surface: services, collector
//! lifecycle, and a pre-seeded event buffer. Behavior is adjusted per
//! test (unsupported hosts, transport failures) and interactions are
//! recorded for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentEvent, ServiceInfo};
use crate::domain::ports::{
    AgentConnector, AgentRpc, CollectorEventBatch, CollectorEventQuery, CpuProfileRequest,
    CpuProfileResponse, MemoryProfileRequest, MemoryProfileResponse, StartCollectorRequest,
    StartCollectorResponse,
};

/// Scripted behavior for one mock agent.
#[derive(Debug, Clone)]
pub struct MockAgentBehavior {
    pub services: Vec<ServiceInfo>,
    pub events: Vec<AgentEvent>,
    /// Answer for `supported` on collector start.
    pub supported: bool,
    /// Non-empty start error even when supported.
    pub start_error: String,
    /// Every RPC fails at the transport layer.
    pub fail_transport: bool,
    pub cpu_response: CpuProfileResponse,
    pub memory_response: MemoryProfileResponse,
}

impl Default for MockAgentBehavior {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            events: Vec::new(),
            supported: true,
            start_error: String::new(),
            fail_transport: false,
            cpu_response: CpuProfileResponse {
                success: true,
                ..CpuProfileResponse::default()
            },
            memory_response: MemoryProfileResponse {
                success: true,
                ..MemoryProfileResponse::default()
            },
        }
    }
}

/// One mock agent: scripted behavior plus recorded interactions.
#[derive(Debug, Default)]
pub struct MockAgent {
    behavior: Mutex<MockAgentBehavior>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    next_collector: AtomicU64,
}

impl MockAgent {
    pub fn new(behavior: MockAgentBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        })
    }

    pub fn with_services(services: Vec<ServiceInfo>) -> Arc<Self> {
        Self::new(MockAgentBehavior {
            services,
            ..MockAgentBehavior::default()
        })
    }

    pub fn set_events(&self, events: Vec<AgentEvent>) {
        self.behavior.lock().unwrap().events = events;
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.behavior.lock().unwrap().fail_transport = fail;
    }

    pub fn set_supported(&self, supported: bool) {
        self.behavior.lock().unwrap().supported = supported;
    }

    /// Collector ids handed out by `start_uprobe_collector`.
    pub fn started_collectors(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Collector ids passed to `stop_uprobe_collector`.
    pub fn stopped_collectors(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn behavior(&self) -> MockAgentBehavior {
        self.behavior.lock().unwrap().clone()
    }
}

struct MockAgentRpc {
    agent: Arc<MockAgent>,
}

#[async_trait]
impl AgentRpc for MockAgentRpc {
    async fn list_services(&self) -> DomainResult<Vec<ServiceInfo>> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }
        Ok(behavior.services)
    }

    async fn start_uprobe_collector(
        &self,
        request: &StartCollectorRequest,
    ) -> DomainResult<StartCollectorResponse> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }

        let collector_id = format!(
            "col-{}-{}",
            request.function_name,
            self.agent.next_collector.fetch_add(1, Ordering::SeqCst)
        );
        self.agent.started.lock().unwrap().push(collector_id.clone());

        Ok(StartCollectorResponse {
            supported: behavior.supported,
            collector_id,
            error: behavior.start_error,
        })
    }

    async fn stop_uprobe_collector(&self, collector_id: &str) -> DomainResult<()> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }
        self.agent
            .stopped
            .lock()
            .unwrap()
            .push(collector_id.to_string());
        Ok(())
    }

    async fn query_uprobe_events(
        &self,
        query: &CollectorEventQuery,
    ) -> DomainResult<CollectorEventBatch> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }

        let events: Vec<AgentEvent> = behavior
            .events
            .into_iter()
            .filter(|carrier| match carrier {
                AgentEvent::Uprobe(e) => {
                    query.start_time.is_none_or(|start| e.timestamp >= start)
                        && query.end_time.is_none_or(|end| e.timestamp <= end)
                }
                _ => true,
            })
            .take(query.max_events as usize)
            .collect();

        Ok(CollectorEventBatch {
            events,
            has_more: false,
        })
    }

    async fn profile_cpu(&self, _request: &CpuProfileRequest) -> DomainResult<CpuProfileResponse> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }
        Ok(behavior.cpu_response)
    }

    async fn profile_memory(
        &self,
        _request: &MemoryProfileRequest,
    ) -> DomainResult<MemoryProfileResponse> {
        let behavior = self.agent.behavior();
        if behavior.fail_transport {
            return Err(DomainError::AgentRpc("mock transport failure".into()));
        }
        Ok(behavior.memory_response)
    }
}

/// Connector resolving mesh addresses to scripted mock agents.
///
/// Addresses not registered explicitly fall back to the default agent,
/// so single-agent tests need no address bookkeeping.
#[derive(Default)]
pub struct MockAgentConnector {
    default_agent: Arc<MockAgent>,
    by_addr: Mutex<HashMap<String, Arc<MockAgent>>>,
}

impl MockAgentConnector {
    pub fn new(default_agent: Arc<MockAgent>) -> Self {
        Self {
            default_agent,
            by_addr: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, addr: impl Into<String>, agent: Arc<MockAgent>) {
        self.by_addr.lock().unwrap().insert(addr.into(), agent);
    }

    pub fn default_agent(&self) -> Arc<MockAgent> {
        self.default_agent.clone()
    }
}

impl AgentConnector for MockAgentConnector {
    fn connect(&self, addr: &str) -> Box<dyn AgentRpc> {
        let agent = self
            .by_addr
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .unwrap_or_else(|| self.default_agent.clone());
        Box::new(MockAgentRpc { agent })
    }
}
