//! Shared fixtures for orchestrator integration tests.

use std::sync::Arc;

use async_trait::async_trait;

use polyp::adapters::agent::{MockAgent, MockAgentConnector};
use polyp::adapters::sqlite::{create_migrated_test_pool, SqliteDebugStore};
use polyp::domain::errors::DomainResult;
use polyp::domain::models::{Config, FunctionCandidate, ServiceInfo};
use polyp::domain::ports::{AgentConnector, DebugStore, FunctionRegistry};
use polyp::services::{AgentRegistration, Orchestrator};

/// Function registry answering from a fixed candidate list.
pub struct StaticFunctionRegistry {
    candidates: Vec<FunctionCandidate>,
}

impl StaticFunctionRegistry {
    pub fn new(candidates: Vec<FunctionCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl FunctionRegistry for StaticFunctionRegistry {
    async fn query_functions(
        &self,
        service_name: &str,
        _query: &str,
        max_results: u32,
    ) -> DomainResult<Vec<FunctionCandidate>> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.service_name == service_name)
            .take(max_results as usize)
            .cloned()
            .collect())
    }
}

pub fn candidate(service: &str, function: &str, agent_id: &str) -> FunctionCandidate {
    FunctionCandidate {
        service_name: service.to_string(),
        function_name: function.to_string(),
        agent_id: agent_id.to_string(),
        package_name: None,
        file_path: None,
        line_number: None,
        offset: None,
        has_dwarf: true,
    }
}

pub struct Colony {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn DebugStore>,
    pub agent: Arc<MockAgent>,
}

/// One registered agent ("a1" at 10.0.0.1) hosting `billing`, wired to
/// an orchestrator over mock transport.
pub async fn colony_with_candidates(candidates: Vec<FunctionCandidate>) -> Colony {
    let pool = create_migrated_test_pool().await.unwrap();
    let store: Arc<dyn DebugStore> = Arc::new(SqliteDebugStore::new(pool));

    let agent = MockAgent::with_services(vec![
        ServiceInfo::new("billing", 8080).with_process_id(42),
    ]);
    let connector: Arc<dyn AgentConnector> = Arc::new(MockAgentConnector::new(agent.clone()));

    let orchestrator = Orchestrator::new(
        store.clone(),
        connector,
        Arc::new(StaticFunctionRegistry::new(candidates)),
        &Config::default(),
    );

    orchestrator
        .registry()
        .register(AgentRegistration {
            agent_id: "a1".to_string(),
            name: "host-1".to_string(),
            mesh_ipv4: "10.0.0.1".to_string(),
            mesh_ipv6: None,
            services: vec![ServiceInfo::new("billing", 8080)],
            runtime_context: None,
            protocol_version: 1,
        })
        .await
        .unwrap();

    Colony {
        orchestrator,
        store,
        agent,
    }
}

pub async fn colony() -> Colony {
    colony_with_candidates(Vec::new()).await
}
