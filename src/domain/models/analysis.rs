//! Analysis result types: call trees, duration statistics, slow calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic root inserted when a session has multiple distinct entry
/// functions, to keep the call tree single-rooted.
pub const MULTI_ROOT_NAME: &str = "(multiple entry points)";

/// One node of a reconstructed call tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTreeNode {
    pub function_name: String,
    /// Wall time spent in this function and its callees.
    pub total_duration_ns: u64,
    /// `total_duration_ns` minus the children's totals. Never negative
    /// for well-formed input.
    pub self_duration_ns: u64,
    pub call_count: u64,
    /// Set when `total_duration_ns` exceeds the caller-provided p95
    /// threshold.
    pub is_slow: bool,
    /// Callees, sorted by total duration descending.
    pub children: Vec<CallTreeNode>,
}

impl CallTreeNode {
    /// Depth-first count of nodes, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(CallTreeNode::node_count).sum::<usize>()
    }

    pub fn find_child(&self, name: &str) -> Option<&CallTreeNode> {
        self.children.iter().find(|c| c.function_name == name)
    }
}

/// Percentile durations over a session's completed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPercentiles {
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

/// Call-duration statistics for a session.
///
/// When no return events carried a positive duration, `percentiles` is
/// absent and `total_calls` approximates half the raw event count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationStats {
    pub total_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<DurationPercentiles>,
}

impl DurationStats {
    pub fn empty() -> Self {
        Self {
            total_calls: 0,
            percentiles: None,
        }
    }

    /// The p95 threshold used for slow-call flagging, when known.
    pub fn p95_ns(&self) -> Option<u64> {
        self.percentiles.map(|p| p.p95_ns)
    }

    pub fn p95_ms(&self) -> Option<f64> {
        self.p95_ns().map(|ns| ns as f64 / 1e6)
    }
}

/// A completed call whose duration exceeded the p95 threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowCall {
    pub function_name: String,
    pub process_id: u32,
    pub thread_id: u32,
    pub duration_ns: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated analysis for one debug session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugResults {
    pub session_id: Uuid,
    pub function_name: String,
    /// Seconds the session has been collecting, clamped to its expiry.
    pub session_duration_secs: f64,
    pub statistics: DurationStats,
    pub slow_outliers: Vec<SlowCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_tree: Option<CallTreeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
}
