//! Domain errors for the polyp debug orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur while orchestrating debug sessions.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Debug session not found: {0}")]
    SessionNotFound(String),

    #[error("No agent reports service: {0}")]
    ServiceNotFound(String),

    #[error("Service {service_name} not found on agent {agent_id}")]
    ServiceNotOnAgent {
        agent_id: String,
        service_name: String,
    },

    #[error("Agent RPC failed: {0}")]
    AgentRpc(String),

    #[error("Collector rejected: {0}")]
    CollectorRejected(String),

    #[error("Function registry error: {0}")]
    FunctionRegistry(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// True when the error means a referenced entity does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound(_)
                | Self::SessionNotFound(_)
                | Self::ServiceNotFound(_)
                | Self::ServiceNotOnAgent { .. }
        )
    }

    /// True when the error came from a transport edge and could succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::AgentRpc(_) | Self::Database(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
