//! Agent registry: the authoritative in-memory map of agents.
//!
//! The map is rebuilt from the store on startup and refreshed by agent
//! registrations and heartbeats. Store writes are best-effort and
//! asynchronous; in-memory state stays authoritative when the store
//! misbehaves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentEntry, ServiceInfo, ServiceRow};
use crate::domain::ports::DebugStore;

/// Deadline for the spawned best-effort store writes, decoupled from the
/// request that triggered them.
const STORE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fields an agent supplies when it (re-)registers.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub name: String,
    pub mesh_ipv4: String,
    pub mesh_ipv6: Option<String>,
    pub services: Vec<ServiceInfo>,
    pub runtime_context: Option<serde_json::Value>,
    pub protocol_version: u32,
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentEntry>>,
    store: Arc<dyn DebugStore>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn DebugStore>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Register or re-register an agent.
    ///
    /// Fails only on an empty `agent_id`. Re-registration preserves
    /// `registered_at`, overwrites everything else, and refreshes
    /// `last_seen`.
    pub async fn register(&self, registration: AgentRegistration) -> DomainResult<AgentEntry> {
        if registration.agent_id.is_empty() {
            return Err(DomainError::InvalidArgument(
                "agent_id must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let entry = {
            let mut agents = self.agents.write().await;
            let registered_at = agents
                .get(&registration.agent_id)
                .map_or(now, |existing| existing.registered_at);

            let entry = AgentEntry {
                agent_id: registration.agent_id.clone(),
                name: registration.name,
                mesh_ipv4: registration.mesh_ipv4,
                mesh_ipv6: registration.mesh_ipv6,
                registered_at,
                last_seen: now,
                services: registration.services,
                runtime_context: registration.runtime_context,
                protocol_version: registration.protocol_version,
            };
            agents.insert(registration.agent_id, entry.clone());
            entry
        };

        self.persist_rows(entry.to_service_rows());
        Ok(entry)
    }

    /// Refresh an agent's `last_seen`. Errors when the agent is unknown.
    pub async fn heartbeat(&self, agent_id: &str) -> DomainResult<()> {
        let now = Utc::now();
        {
            let mut agents = self.agents.write().await;
            let entry = agents
                .get_mut(agent_id)
                .ok_or_else(|| DomainError::AgentNotFound(agent_id.to_string()))?;
            entry.last_seen = now;
        }

        let store = self.store.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let write = store.update_service_last_seen(&agent_id, now);
            match tokio::time::timeout(STORE_WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "heartbeat store update failed");
                }
                Err(_) => tracing::warn!(agent_id = %agent_id, "heartbeat store update timed out"),
            }
        });

        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentEntry> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn list_all(&self) -> Vec<AgentEntry> {
        self.agents.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Agents whose derived health is healthy or degraded.
    pub async fn count_active(&self) -> usize {
        let now = Utc::now();
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.health_at(now).is_active())
            .count()
    }

    /// First agent whose registered services contain `service_name`.
    /// Iteration order is unspecified; ties are arbitrary.
    pub async fn find_agent_for_service(&self, service_name: &str) -> Option<AgentEntry> {
        self.agents
            .read()
            .await
            .values()
            .find(|a| a.has_service(service_name))
            .cloned()
    }

    /// Rebuild the in-memory map from persisted rows on startup.
    ///
    /// Rows with epoch timestamps are stale pre-init data and are
    /// skipped. An entry already present in memory wins over its
    /// persisted shape: a live reconnection is fresher than the store.
    /// Returns the number of agents loaded.
    pub async fn load_from_store(&self) -> DomainResult<usize> {
        let rows = self.store.list_all_services().await?;

        let mut by_agent: HashMap<String, Vec<ServiceRow>> = HashMap::new();
        let mut skipped = 0usize;
        for row in rows {
            if row.has_zero_timestamps() {
                skipped += 1;
                continue;
            }
            by_agent.entry(row.agent_id.clone()).or_default().push(row);
        }
        if skipped > 0 {
            tracing::info!(skipped, "skipped stale registry rows with zero timestamps");
        }

        let mut loaded = 0usize;
        let mut agents = self.agents.write().await;
        for (agent_id, rows) in by_agent {
            if agents.contains_key(&agent_id) {
                continue;
            }
            if let Some(entry) = AgentEntry::from_service_rows(&rows) {
                agents.insert(agent_id, entry);
                loaded += 1;
            }
        }

        tracing::info!(loaded, "registry loaded from store");
        Ok(loaded)
    }

    /// Fire-and-forget persistence of registry rows.
    fn persist_rows(&self, rows: Vec<ServiceRow>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            for row in rows {
                let write = store.upsert_service(&row);
                match tokio::time::timeout(STORE_WRITE_TIMEOUT, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        agent_id = %row.agent_id,
                        service = %row.service.name,
                        error = %e,
                        "registry store upsert failed"
                    ),
                    Err(_) => tracing::warn!(
                        agent_id = %row.agent_id,
                        "registry store upsert timed out"
                    ),
                }
            }
        });
    }
}
