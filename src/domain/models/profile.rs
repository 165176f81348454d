//! Profiling domain model: live CPU/memory profiles, persisted summary
//! aggregates, and the batch function-profiling report types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis::DurationStats;

/// One sampled CPU stack, frames ordered root to leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStackSample {
    pub frames: Vec<String>,
    /// Number of times this exact stack was observed.
    pub count: u64,
}

/// One sampled allocation stack, frames ordered root to leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStackSample {
    pub frames: Vec<String>,
    pub alloc_bytes: u64,
    pub alloc_objects: u64,
}

/// Persisted CPU aggregate for a time window, keyed by stack hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuProfileSummary {
    pub stack_hash: String,
    /// Encoded frame IDs, decoded to names on read.
    pub stack_frame_ids: Vec<i64>,
    pub sample_count: u64,
}

/// Persisted memory aggregate for a time window, keyed by stack hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryProfileSummary {
    pub stack_hash: String,
    pub stack_frame_ids: Vec<i64>,
    pub alloc_bytes: u64,
    pub alloc_objects: u64,
}

/// Aggregated historical CPU profile for a service and window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuProfileAggregate {
    pub samples: Vec<CpuStackSample>,
    pub total_samples: u64,
}

/// Per-function share of a memory profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBytes {
    pub function_name: String,
    pub alloc_bytes: u64,
    pub alloc_objects: u64,
    /// Share of total bytes, in percent.
    pub percentage: f64,
}

/// Per-allocation-type share of a memory profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeBytes {
    pub type_name: String,
    pub alloc_bytes: u64,
    pub alloc_objects: u64,
    pub percentage: f64,
}

/// Aggregated historical memory profile for a service and window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProfileAggregate {
    pub samples: Vec<MemoryStackSample>,
    pub total_bytes: u64,
    pub total_objects: u64,
    pub top_functions: Vec<FunctionBytes>,
    pub top_types: Vec<TypeBytes>,
}

/// A candidate function returned by the semantic function registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCandidate {
    pub service_name: String,
    pub function_name: String,
    /// Agent hosting the service that owns this function.
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default)]
    pub has_dwarf: bool,
}

/// Function-selection strategy for batch profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    All,
    EntryPoints,
    LeafFunctions,
    CriticalPath,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        Self::All
    }
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::EntryPoints => "entry_points",
            Self::LeafFunctions => "leaf_functions",
            Self::CriticalPath => "critical_path",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(Self::All),
            "entry_points" => Some(Self::EntryPoints),
            "leaf_functions" => Some(Self::LeafFunctions),
            "critical_path" => Some(Self::CriticalPath),
            _ => None,
        }
    }
}

/// Outcome of a batch profiling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    /// Async run: probes attached, collection continues in the background.
    InProgress,
    Completed,
    /// Some probes failed to attach; results cover the rest.
    PartialSuccess,
    /// Every probe attach failed.
    Failed,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
        }
    }
}

/// Severity ladder for a detected bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckSeverity {
    Minor,
    Major,
    Critical,
}

impl BottleneckSeverity {
    /// Critical above 1 s, major above 500 ms, minor otherwise.
    pub fn classify(p95_ms: f64) -> Self {
        if p95_ms > 1_000.0 {
            Self::Critical
        } else if p95_ms > 500.0 {
            Self::Major
        } else {
            Self::Minor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }
}

/// A function whose p95 crossed the bottleneck threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub function_name: String,
    pub p95_ms: f64,
    pub severity: BottleneckSeverity,
}

/// Per-function outcome of a batch profiling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionProfileResult {
    pub function_name: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub probe_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub event_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DurationStats>,
}

/// Counts for a batch profiling run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRunSummary {
    pub functions_discovered: usize,
    pub probes_attached: usize,
    pub probes_failed: usize,
    pub total_events: u64,
    pub duration_secs: u64,
}

/// Full report of a `ProfileFunctions` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReport {
    pub status: ProfileStatus,
    pub summary: ProfileRunSummary,
    pub results: Vec<FunctionProfileResult>,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendation: String,
    pub next_steps: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ladder() {
        assert_eq!(BottleneckSeverity::classify(150.0), BottleneckSeverity::Minor);
        assert_eq!(BottleneckSeverity::classify(501.0), BottleneckSeverity::Major);
        assert_eq!(BottleneckSeverity::classify(1_500.0), BottleneckSeverity::Critical);
    }

    #[test]
    fn test_strategy_round_trip() {
        assert_eq!(SelectionStrategy::parse_str("entry_points"), Some(SelectionStrategy::EntryPoints));
        assert_eq!(SelectionStrategy::parse_str("ALL"), Some(SelectionStrategy::All));
        assert_eq!(SelectionStrategy::parse_str("hot_path"), None);
        assert_eq!(SelectionStrategy::CriticalPath.as_str(), "critical_path");
    }

    #[test]
    fn test_candidate_deserialization_defaults() {
        let json = r#"{"service_name": "billing", "function_name": "main.Charge", "agent_id": "a1"}"#;
        let c: FunctionCandidate = serde_json::from_str(json).unwrap();
        assert!(c.package_name.is_none());
        assert!(!c.has_dwarf);
    }
}
