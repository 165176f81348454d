//! Instrumentation events emitted by agent-side uprobe collectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a single uprobe datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UprobeEventType {
    /// Function entry.
    Entry,
    /// Function return. Carries a meaningful `duration_ns`.
    Return,
}

impl UprobeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Return => "return",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entry" => Some(Self::Entry),
            "return" => Some(Self::Return),
            _ => None,
        }
    }
}

/// One instrumentation datum captured by a collector.
///
/// Timestamps are wall-clock, monotonic within a thread on one agent.
/// A `Return` should pair with a prior `Entry` on the same thread;
/// analytics skip unpaired events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UprobeEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: UprobeEventType,
    pub function_name: String,
    pub thread_id: u32,
    pub process_id: u32,
    /// Nanoseconds spent in the function. Only meaningful for `Return`.
    #[serde(default)]
    pub duration_ns: u64,
    /// Captured argument payload, when the probe was configured for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_payload: Option<serde_json::Value>,
    /// Captured return payload, when the probe was configured for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_payload: Option<serde_json::Value>,
}

impl UprobeEvent {
    pub fn is_return(&self) -> bool {
        self.event_type == UprobeEventType::Return
    }
}

/// Carrier envelope for events streamed out of an agent.
///
/// Agents multiplex several event families over one stream; the
/// orchestrator narrows to the uprobe variant and drops the rest
/// silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    Uprobe(UprobeEvent),
    /// Collector lifecycle notice (started, flushed, …). Informational.
    Lifecycle { message: String },
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// Narrow the carrier to its uprobe payload, if any.
    pub fn into_uprobe(self) -> Option<UprobeEvent> {
        match self {
            Self::Uprobe(event) => Some(event),
            _ => None,
        }
    }
}

/// Drop non-uprobe carriers and unwrap the rest.
pub fn narrow_to_uprobes(carriers: Vec<AgentEvent>) -> Vec<UprobeEvent> {
    carriers.into_iter().filter_map(AgentEvent::into_uprobe).collect()
}
