//! Query router: dual-source event reads and aggregated debug results.
//!
//! One decision variable drives routing: a session counts as expired
//! once its deadline passed or it was stopped. Expired sessions read
//! from the store; active sessions prefer the live agent and fall back
//! to the store on any failure. `GetDebugResults` is stricter: an
//! unreachable agent on an active session is an error so the caller
//! retries instead of analyzing a partial store view.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    narrow_to_uprobes, DebugResults, DebugSession, UprobeEvent,
};
use crate::domain::ports::{AgentConnector, CollectorEventQuery, DebugStore};
use crate::services::analytics;
use crate::services::coordinator::AgentCoordinator;
use crate::services::registry::AgentRegistry;

/// Default event cap when the caller does not give one.
pub const DEFAULT_MAX_EVENTS: u32 = 10_000;

/// Inputs to `QueryUprobeEvents`.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub session_id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub max_events: Option<u32>,
}

impl EventQuery {
    pub fn all(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start: None,
            end: None,
            max_events: None,
        }
    }

    fn cap(&self) -> u32 {
        match self.max_events {
            Some(0) | None => DEFAULT_MAX_EVENTS,
            Some(n) => n,
        }
    }
}

pub struct QueryRouter {
    registry: Arc<AgentRegistry>,
    coordinator: Arc<AgentCoordinator>,
    connector: Arc<dyn AgentConnector>,
    store: Arc<dyn DebugStore>,
}

impl QueryRouter {
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

    /// Route an event query between live agent and store.
    pub async fn query_uprobe_events(&self, query: &EventQuery) -> DomainResult<Vec<UprobeEvent>> {
        let session = self
            .store
            .get_debug_session(&query.session_id)
            .await?
            .ok_or_else(|| DomainError::SessionNotFound(query.session_id.clone()))?;

        if session.is_expired_at(Utc::now()) {
            return self.query_store(query).await;
        }

        match self.query_agent(&session, query).await {
            Ok(events) => Ok(events),
            Err(e) => {
                tracing::warn!(
                    session_id = %query.session_id,
                    error = %e,
                    "agent query failed, falling back to store"
                );
                self.query_store(query).await
            }
        }
    }

    /// Aggregate a session's events into statistics, outliers, and a
    /// call tree.
    pub async fn get_debug_results(&self, session_id: &str) -> DomainResult<DebugResults> {
        let session = self
            .store
            .get_debug_session(session_id)
            .await?
            .ok_or_else(|| DomainError::SessionNotFound(session_id.to_string()))?;

        // PID and binary path are decoration; their absence never fails
        // the query.
        let service = match self.registry.get(&session.agent_id).await {
            Some(entry) => entry.find_service(&session.service_name).cloned(),
            None => None,
        };

        let now = Utc::now();
        let query = EventQuery::all(session_id);
        let events = if session.is_expired_at(now) {
            self.query_store(&query).await?
        } else {
            // No fallback on this path: a partial store view would skew
            // the analysis of a live session.
            self.query_agent(&session, &query).await?
        };

        let statistics = analytics::aggregate_statistics(&events);
        let p95_threshold_ns = statistics.p95_ns().unwrap_or(u64::MAX);
        let slow_outliers = analytics::find_slow_outliers(&events, p95_threshold_ns);
        let call_tree = analytics::build_call_tree(&events, p95_threshold_ns);

        Ok(DebugResults {
            session_id: session.session_id,
            function_name: session.function_name.clone(),
            session_duration_secs: session.duration_secs_at(now),
            statistics,
            slow_outliers,
            call_tree,
            process_id: service.as_ref().and_then(|s| s.process_id),
            binary_path: service.and_then(|s| s.binary_path),
        })
    }

    /// Store path: all persisted events, time-filtered in memory,
    /// truncated to the cap while preserving persisted order.
    async fn query_store(&self, query: &EventQuery) -> DomainResult<Vec<UprobeEvent>> {
        let events = self.store.get_debug_events(&query.session_id).await?;
        let cap = query.cap() as usize;

        let mut filtered = Vec::new();
        for event in events {
            if query.start.is_some_and(|start| event.timestamp < start) {
                continue;
            }
            if query.end.is_some_and(|end| event.timestamp > end) {
                continue;
            }
            filtered.push(event);
            if filtered.len() >= cap {
                break;
            }
        }
        Ok(filtered)
    }

    /// Agent path: query the live collector and narrow the carriers.
    async fn query_agent(
        &self,
        session: &DebugSession,
        query: &EventQuery,
    ) -> DomainResult<Vec<UprobeEvent>> {
        let entry = self
            .registry
            .get(&session.agent_id)
            .await
            .ok_or_else(|| DomainError::AgentNotFound(session.agent_id.clone()))?;

        let client = self.connector.connect(&self.coordinator.agent_addr(&entry));
        let batch = client
            .query_uprobe_events(&CollectorEventQuery {
                collector_id: session.collector_id.clone(),
                start_time: query.start,
                end_time: query.end,
                max_events: query.cap(),
            })
            .await?;

        Ok(narrow_to_uprobes(batch.events))
    }
}
