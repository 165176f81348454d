//! Agent coordinator: real-time service discovery and PID lookup.
//!
//! Registry entries cache the services an agent reported at registration
//! time, which may be stale or empty. Both operations here query agents
//! live instead of trusting the cache.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentEntry;
use crate::domain::ports::AgentConnector;
use crate::services::registry::AgentRegistry;

pub struct AgentCoordinator {
    registry: Arc<AgentRegistry>,
    connector: Arc<dyn AgentConnector>,
    agent_port: u16,
    /// Per-agent probe deadline during discovery fan-out.
    discovery_timeout: Duration,
}

impl AgentCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        connector: Arc<dyn AgentConnector>,
        agent_port: u16,
        discovery_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            agent_port,
            discovery_timeout,
        }
    }

    /// Mesh address of an agent's RPC endpoint.
    pub fn agent_addr(&self, entry: &AgentEntry) -> String {
        format!("{}:{}", entry.mesh_ipv4, self.agent_port)
    }

    /// Find the agent hosting `service_name` by fanning out live
    /// `ListServices` probes.
    ///
    /// Agents are probed sequentially with a short per-call deadline;
    /// timeouts and transport errors skip to the next agent. First match
    /// in iteration order wins.
    pub async fn find_agent_for_service(&self, service_name: &str) -> DomainResult<String> {
        for entry in self.registry.list_all().await {
            let client = self.connector.connect(&self.agent_addr(&entry));
            let services =
                match tokio::time::timeout(self.discovery_timeout, client.list_services()).await {
                    Ok(Ok(services)) => services,
                    Ok(Err(e)) => {
                        tracing::debug!(agent_id = %entry.agent_id, error = %e, "discovery probe failed");
                        continue;
                    }
                    Err(_) => {
                        tracing::debug!(agent_id = %entry.agent_id, "discovery probe timed out");
                        continue;
                    }
                };

            if services.iter().any(|s| s.name == service_name) {
                return Ok(entry.agent_id);
            }
        }

        Err(DomainError::ServiceNotFound(service_name.to_string()))
    }

    /// Resolve the PID of `service_name` on a specific agent.
    pub async fn get_service_pid(&self, agent_id: &str, service_name: &str) -> DomainResult<u32> {
        let entry = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;

        let client = self.connector.connect(&self.agent_addr(&entry));
        let services = client.list_services().await?;

        services
            .iter()
            .find(|s| s.name == service_name)
            .and_then(|s| s.process_id)
            .ok_or_else(|| DomainError::ServiceNotOnAgent {
                agent_id: agent_id.to_string(),
                service_name: service_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agent::{MockAgent, MockAgentConnector};
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteDebugStore};
    use crate::domain::models::ServiceInfo;
    use crate::domain::ports::DebugStore;
    use crate::services::registry::AgentRegistration;

    const AGENT_PORT: u16 = 50051;

    async fn registry() -> Arc<AgentRegistry> {
        let pool = create_migrated_test_pool().await.unwrap();
        let store: Arc<dyn DebugStore> = Arc::new(SqliteDebugStore::new(pool));
        Arc::new(AgentRegistry::new(store))
    }

    fn registration(agent_id: &str, ip: &str) -> AgentRegistration {
        AgentRegistration {
            agent_id: agent_id.to_string(),
            name: agent_id.to_string(),
            mesh_ipv4: ip.to_string(),
            mesh_ipv6: None,
            // Deliberately stale: discovery must not trust this.
            services: vec![],
            runtime_context: None,
            protocol_version: 1,
        }
    }

    fn coordinator(
        registry: Arc<AgentRegistry>,
        connector: Arc<MockAgentConnector>,
    ) -> AgentCoordinator {
        AgentCoordinator::new(registry, connector, AGENT_PORT, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_discovery_queries_agents_live() {
        let registry = registry().await;
        registry.register(registration("a1", "10.0.0.1")).await.unwrap();
        registry.register(registration("a2", "10.0.0.2")).await.unwrap();

        let empty = MockAgent::with_services(vec![]);
        let hosting = MockAgent::with_services(vec![
            ServiceInfo::new("billing", 8080).with_process_id(42),
        ]);
        let connector = Arc::new(MockAgentConnector::new(empty));
        connector.register(format!("10.0.0.2:{AGENT_PORT}"), hosting);

        let coordinator = coordinator(registry, connector);
        let agent_id = coordinator.find_agent_for_service("billing").await.unwrap();
        assert_eq!(agent_id, "a2");
    }

    #[tokio::test]
    async fn test_discovery_skips_failing_agents() {
        let registry = registry().await;
        registry.register(registration("a1", "10.0.0.1")).await.unwrap();
        registry.register(registration("a2", "10.0.0.2")).await.unwrap();

        let broken = MockAgent::with_services(vec![]);
        broken.set_fail_transport(true);
        let hosting = MockAgent::with_services(vec![ServiceInfo::new("billing", 8080)]);
        let connector = Arc::new(MockAgentConnector::new(broken));
        connector.register(format!("10.0.0.2:{AGENT_PORT}"), hosting);

        let coordinator = coordinator(registry, connector);
        let agent_id = coordinator.find_agent_for_service("billing").await.unwrap();
        assert_eq!(agent_id, "a2");
    }

    #[tokio::test]
    async fn test_discovery_not_found() {
        let registry = registry().await;
        registry.register(registration("a1", "10.0.0.1")).await.unwrap();

        let connector = Arc::new(MockAgentConnector::new(MockAgent::with_services(vec![])));
        let coordinator = coordinator(registry, connector);

        let err = coordinator.find_agent_for_service("ghost").await.unwrap_err();
        assert!(matches!(err, DomainError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_service_pid() {
        let registry = registry().await;
        registry.register(registration("a1", "10.0.0.1")).await.unwrap();

        let agent = MockAgent::with_services(vec![
            ServiceInfo::new("billing", 8080).with_process_id(42),
            ServiceInfo::new("checkout", 8081),
        ]);
        let connector = Arc::new(MockAgentConnector::new(agent));
        let coordinator = coordinator(registry, connector);

        assert_eq!(coordinator.get_service_pid("a1", "billing").await.unwrap(), 42);

        // Known agent, service present but with no PID resolved.
        let err = coordinator.get_service_pid("a1", "checkout").await.unwrap_err();
        assert!(matches!(err, DomainError::ServiceNotOnAgent { .. }));

        let err = coordinator.get_service_pid("ghost", "billing").await.unwrap_err();
        assert!(matches!(err, DomainError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_service_pid_transport_error() {
        let registry = registry().await;
        registry.register(registration("a1", "10.0.0.1")).await.unwrap();

        let agent = MockAgent::with_services(vec![]);
        agent.set_fail_transport(true);
        let connector = Arc::new(MockAgentConnector::new(agent));
        let coordinator = coordinator(registry, connector);

        let err = coordinator.get_service_pid("a1", "billing").await.unwrap_err();
        assert!(matches!(err, DomainError::AgentRpc(_)));
    }
}
