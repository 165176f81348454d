//! Debug session domain model.
//!
//! A session is the colony's persistent record of one probe attached to
//! one function through one agent-local collector. Records survive as an
//! audit trail; `stopped` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Collector is (or is assumed to be) running on the agent.
    Active,
    /// Session has been retired. Terminal.
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Probe behavior requested at attach time, forwarded to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Capture function argument payloads on entry events.
    #[serde(default)]
    pub capture_args: bool,
    /// Capture return-value payloads on return events.
    #[serde(default)]
    pub capture_return: bool,
    /// Fraction of invocations to instrument, in `[0, 1]`.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            capture_args: false,
            capture_return: false,
            sample_rate: 1.0,
        }
    }
}

/// One attach of one function via one collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    /// Globally unique session key.
    pub session_id: Uuid,
    /// Opaque collector handle returned by the agent.
    pub collector_id: String,
    /// Service the probed function belongs to.
    pub service_name: String,
    /// Fully qualified probed function name.
    pub function_name: String,
    /// Agent hosting the collector.
    pub agent_id: String,
    /// Opaque transport address of the probed process's SDK, if supplied.
    pub sdk_addr: Option<String>,
    /// When the collector was started.
    pub started_at: DateTime<Utc>,
    /// When the collector self-terminates on the agent.
    pub expires_at: DateTime<Utc>,
    /// Current status. `Stopped` never reverts.
    pub status: SessionStatus,
}

impl DebugSession {
    /// A session is expired once its deadline passed or it was stopped.
    /// Expired sessions are served from the store, never the agent.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Stopped || now >= self.expires_at
    }

    /// Wall-clock seconds the session has been (or was) collecting,
    /// clamped to its expiry.
    pub fn duration_secs_at(&self, now: DateTime<Utc>) -> f64 {
        let end = if now < self.expires_at { now } else { self.expires_at };
        let nanos = end
            .signed_duration_since(self.started_at)
            .num_nanoseconds()
            .unwrap_or(0)
            .max(0);
        nanos as f64 / 1e9
    }
}

/// Filter for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub service_name: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn active() -> Self {
        Self {
            service_name: None,
            status: Some(SessionStatus::Active),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(started_secs_ago: i64, lifetime_secs: i64) -> DebugSession {
        let started = Utc::now() - Duration::seconds(started_secs_ago);
        DebugSession {
            session_id: Uuid::new_v4(),
            collector_id: "col-1".into(),
            service_name: "billing".into(),
            function_name: "main.ProcessPayment".into(),
            agent_id: "agent-1".into(),
            sdk_addr: None,
            started_at: started,
            expires_at: started + Duration::seconds(lifetime_secs),
            status: SessionStatus::Active,
        }
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(SessionStatus::parse_str("active"), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::parse_str("STOPPED"), Some(SessionStatus::Stopped));
        assert_eq!(SessionStatus::parse_str("zombie"), None);
        assert_eq!(SessionStatus::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_active_session_not_expired() {
        let s = session(10, 60);
        assert!(!s.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_deadline_expiry() {
        let s = session(120, 60);
        assert!(s.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_stopped_is_expired_regardless_of_deadline() {
        let mut s = session(1, 600);
        s.status = SessionStatus::Stopped;
        assert!(s.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_duration_clamped_to_expiry() {
        let s = session(120, 60);
        let secs = s.duration_secs_at(Utc::now());
        assert!((secs - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_probe_config_defaults() {
        let config: ProbeConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.capture_args);
        assert!((config.sample_rate - 1.0).abs() < f64::EPSILON);
    }
}
