//! Durable-store port for debug sessions, events, registry rows, and
//! profile summaries.
//!
//! Services depend on this trait, not concrete implementations. The
//! store is the source of truth for session state; event inserts must be
//! idempotent on `(session_id, timestamp, event_type, thread_id)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CpuProfileSummary, DebugSession, MemoryProfileSummary, ServiceRow, SessionFilter,
    SessionStatus, UprobeEvent,
};

#[async_trait]
pub trait DebugStore: Send + Sync {
    /// Insert a new session record. `session_id` is unique.
    async fn insert_debug_session(&self, session: &DebugSession) -> DomainResult<()>;

    /// Fetch one session, or `None` when unknown.
    async fn get_debug_session(&self, session_id: &str) -> DomainResult<Option<DebugSession>>;

    /// Transition a session's status. Last write wins; `stopped` is
    /// terminal by convention of the callers.
    async fn update_debug_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> DomainResult<()>;

    /// List sessions matching the filter.
    async fn list_debug_sessions(&self, filter: &SessionFilter) -> DomainResult<Vec<DebugSession>>;

    /// Persist a batch of events for a session. Duplicate rows on the
    /// idempotence composite are ignored; returns the number actually
    /// inserted.
    async fn insert_debug_events(
        &self,
        session_id: &str,
        events: &[UprobeEvent],
    ) -> DomainResult<u64>;

    /// All events of a session, in insertion order.
    async fn get_debug_events(&self, session_id: &str) -> DomainResult<Vec<UprobeEvent>>;

    /// Upsert one flattened (agent, service) registry row.
    async fn upsert_service(&self, row: &ServiceRow) -> DomainResult<()>;

    /// Refresh `last_seen` on every row of an agent.
    async fn update_service_last_seen(
        &self,
        agent_id: &str,
        last_seen: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// Every persisted registry row, for startup reconstruction.
    async fn list_all_services(&self) -> DomainResult<Vec<ServiceRow>>;

    /// CPU profile summaries for a service within a window.
    async fn query_cpu_profile_summaries(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<CpuProfileSummary>>;

    /// Memory profile summaries for a service within a window.
    async fn query_memory_profile_summaries(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<MemoryProfileSummary>>;

    /// Decode stack frame IDs to names, preserving input order.
    /// Unknown IDs decode to a `frame#<id>` placeholder.
    async fn decode_stack_frames(&self, frame_ids: &[i64]) -> DomainResult<Vec<String>>;
}
