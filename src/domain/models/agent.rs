//! Agent registry domain model.
//!
//! An agent is the per-host daemon that owns probe execution on local
//! processes and exposes an RPC endpoint over the mesh. The colony keeps
//! one authoritative entry per agent, refreshed by registration and
//! heartbeats; health is derived from `last_seen`, never stored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived health classification of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Seen within the last 30 seconds.
    Healthy,
    /// Seen within the last 2 minutes.
    Degraded,
    /// Not seen for 2 minutes or more.
    Unhealthy,
}

impl AgentHealth {
    /// Agents seen within this window are healthy.
    pub const HEALTHY_WITHIN_SECS: i64 = 30;
    /// Agents seen within this window (but past the healthy one) are degraded.
    pub const DEGRADED_WITHIN_SECS: i64 = 120;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }

    /// Classify an agent from its last-seen timestamp.
    ///
    /// Monotonic in `now - last_seen`: healthy, then degraded, then
    /// unhealthy, never backward for a fixed `last_seen`.
    pub fn determine(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now.signed_duration_since(last_seen).num_seconds();
        if age < Self::HEALTHY_WITHIN_SECS {
            Self::Healthy
        } else if age < Self::DEGRADED_WITHIN_SECS {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    /// Healthy and degraded agents both count as active.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// A service exposed by a process on an agent host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name as reported by the agent.
    pub name: String,
    /// Listening port on the host.
    pub port: u16,
    /// PID of the owning process, when the agent resolved one.
    pub process_id: Option<u32>,
    /// Path of the binary backing the service.
    pub binary_path: Option<String>,
    /// Free-form key/value labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            process_id: None,
            binary_path: None,
            labels: HashMap::new(),
        }
    }

    pub fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    pub fn with_binary_path(mut self, path: impl Into<String>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A registered agent.
///
/// Created on first registration, mutated on re-registration and
/// heartbeats, never explicitly deleted. `registered_at` survives
/// re-registration; every other field may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Unique agent key, non-empty.
    pub agent_id: String,
    /// Legacy display name.
    pub name: String,
    /// IPv4 address on the mesh overlay.
    pub mesh_ipv4: String,
    /// IPv6 address on the mesh overlay, if assigned.
    pub mesh_ipv6: Option<String>,
    /// When the agent first registered.
    pub registered_at: DateTime<Utc>,
    /// When the agent was last heard from.
    pub last_seen: DateTime<Utc>,
    /// Services the agent reported at registration. May be stale; the
    /// coordinator re-queries agents for authoritative answers.
    pub services: Vec<ServiceInfo>,
    /// Opaque runtime-context blob supplied by the agent.
    pub runtime_context: Option<serde_json::Value>,
    /// Agent protocol version.
    pub protocol_version: u32,
}

impl AgentEntry {
    pub fn health_at(&self, now: DateTime<Utc>) -> AgentHealth {
        AgentHealth::determine(self.last_seen, now)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Flatten this entry into one persistable row per service.
    ///
    /// Agents with no services still produce a single row (empty service
    /// name) so re-registration survives restarts.
    pub fn to_service_rows(&self) -> Vec<ServiceRow> {
        if self.services.is_empty() {
            return vec![ServiceRow {
                agent_id: self.agent_id.clone(),
                agent_name: self.name.clone(),
                mesh_ipv4: self.mesh_ipv4.clone(),
                mesh_ipv6: self.mesh_ipv6.clone(),
                service: ServiceInfo::default(),
                registered_at: self.registered_at,
                last_seen: self.last_seen,
            }];
        }

        self.services
            .iter()
            .map(|svc| ServiceRow {
                agent_id: self.agent_id.clone(),
                agent_name: self.name.clone(),
                mesh_ipv4: self.mesh_ipv4.clone(),
                mesh_ipv6: self.mesh_ipv6.clone(),
                service: svc.clone(),
                registered_at: self.registered_at,
                last_seen: self.last_seen,
            })
            .collect()
    }

    /// Rebuild an entry from its persisted rows. Returns `None` for an
    /// empty slice.
    pub fn from_service_rows(rows: &[ServiceRow]) -> Option<Self> {
        let first = rows.first()?;
        let services = rows
            .iter()
            .filter(|r| !r.service.name.is_empty())
            .map(|r| r.service.clone())
            .collect();

        Some(Self {
            agent_id: first.agent_id.clone(),
            name: first.agent_name.clone(),
            mesh_ipv4: first.mesh_ipv4.clone(),
            mesh_ipv6: first.mesh_ipv6.clone(),
            registered_at: first.registered_at,
            last_seen: first.last_seen,
            services,
            runtime_context: None,
            protocol_version: 0,
        })
    }
}

/// Flattened (agent, service) row as persisted in `agent_services`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRow {
    pub agent_id: String,
    pub agent_name: String,
    pub mesh_ipv4: String,
    pub mesh_ipv6: Option<String>,
    pub service: ServiceInfo,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ServiceRow {
    /// Rows persisted before the agent ever checked in carry epoch
    /// timestamps; the registry skips them on startup load.
    pub fn has_zero_timestamps(&self) -> bool {
        self.registered_at.timestamp() == 0 || self.last_seen.timestamp() == 0
    }
}
