//! Batch function profiler: discover, select, fan-out attach, collect,
//! analyze, detach.
//!
//! Partial failure never aborts a run. Attach failures are counted and
//! reported; the synchronous collect loop keeps its own event cursors
//! and preserves whatever landed in the store if the caller goes away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    Bottleneck, BottleneckSeverity, FunctionCandidate, FunctionProfileResult, ProbeConfig,
    ProfileReport, ProfileRunSummary, ProfileStatus, SelectionStrategy,
};
use crate::domain::ports::{DebugStore, FunctionRegistry};
use crate::services::analytics;
use crate::services::query_router::{EventQuery, QueryRouter};
use crate::services::session_manager::{AttachRequest, SessionManager};

/// Functions profiled when the caller does not say.
pub const DEFAULT_MAX_FUNCTIONS: u32 = 20;

/// Hard cap on functions per run.
pub const MAX_FUNCTIONS_CAP: u32 = 50;

/// Profile window when the caller does not say.
pub const DEFAULT_PROFILE_DURATION: Duration = Duration::from_secs(60);

/// Longest profile window a caller may request.
pub const MAX_PROFILE_DURATION: Duration = Duration::from_secs(300);

/// Probe lifetime slack past the profile window, so collectors outlive
/// the final drain.
const ATTACH_BUFFER: Duration = Duration::from_secs(30);

/// Interval of the synchronous collect loop.
const COLLECT_TICK: Duration = Duration::from_secs(5);

/// p95 above this many milliseconds flags a bottleneck.
const BOTTLENECK_P95_MS: f64 = 100.0;

/// Inputs to `ProfileFunctions`.
#[derive(Debug, Clone)]
pub struct ProfileFunctionsRequest {
    pub service_name: String,
    /// Semantic search string fed to the function registry.
    pub query: String,
    pub strategy: SelectionStrategy,
    pub max_functions: Option<u32>,
    pub duration: Option<Duration>,
    pub sample_rate: f64,
    /// Return immediately after the attach fan-out.
    pub run_async: bool,
}

struct ProbeAttempt {
    candidate: FunctionCandidate,
    session_id: Option<Uuid>,
    error: Option<String>,
}

pub struct FunctionProfiler {
    functions: Arc<dyn FunctionRegistry>,
    sessions: Arc<SessionManager>,
    router: Arc<QueryRouter>,
    store: Arc<dyn DebugStore>,
}

impl FunctionProfiler {
    pub fn new(
        functions: Arc<dyn FunctionRegistry>,
        sessions: Arc<SessionManager>,
        router: Arc<QueryRouter>,
        store: Arc<dyn DebugStore>,
    ) -> Self {
        Self {
            functions,
            sessions,
            router,
            store,
        }
    }

    pub async fn profile_functions(&self, request: ProfileFunctionsRequest) -> ProfileReport {
        let max_functions = clamp_max_functions(request.max_functions);
        let duration = clamp_profile_duration(request.duration);

        // Discover.
        let candidates = match self
            .functions
            .query_functions(&request.service_name, &request.query, max_functions)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                return failed_report(format!("function discovery failed: {e}"));
            }
        };
        if candidates.is_empty() {
            return failed_report(format!(
                "no functions matched '{}' for service {}",
                request.query, request.service_name
            ));
        }

        // Select.
        let selected = select_functions(request.strategy, candidates, max_functions as usize);
        let discovered = selected.len();

        // Attach fan-out.
        let mut attempts = Vec::with_capacity(selected.len());
        for candidate in selected {
            let response = self
                .sessions
                .attach_uprobe(AttachRequest {
                    service_name: candidate.service_name.clone(),
                    function_name: candidate.function_name.clone(),
                    agent_id: Some(candidate.agent_id.clone()),
                    duration: Some(duration + ATTACH_BUFFER),
                    config: ProbeConfig {
                        capture_args: false,
                        capture_return: false,
                        sample_rate: request.sample_rate,
                    },
                    sdk_addr: None,
                })
                .await;

            attempts.push(ProbeAttempt {
                candidate,
                session_id: if response.success { response.session_id } else { None },
                error: response.error,
            });
        }

        let attached = attempts.iter().filter(|a| a.session_id.is_some()).count();
        let failed = attempts.len() - attached;

        if request.run_async {
            return ProfileReport {
                status: ProfileStatus::InProgress,
                summary: ProfileRunSummary {
                    functions_discovered: discovered,
                    probes_attached: attached,
                    probes_failed: failed,
                    total_events: 0,
                    duration_secs: duration.as_secs(),
                },
                results: attempts.into_iter().map(attempt_to_result).collect(),
                bottlenecks: Vec::new(),
                recommendation: format!(
                    "{attached} probe(s) collecting in the background for {}s",
                    duration.as_secs()
                ),
                next_steps: vec![
                    "Poll GetDebugResults per session for live statistics".to_string(),
                    "DetachUprobe each session when done".to_string(),
                ],
            };
        }

        // Synchronous collect.
        if attached > 0 {
            self.collect_until(&attempts, Utc::now() + chrono::Duration::from_std(duration)
                .unwrap_or(chrono::Duration::seconds(60)))
                .await;
        }

        // Analyze.
        let mut results = Vec::with_capacity(attempts.len());
        let mut bottlenecks = Vec::new();
        let mut total_events = 0u64;
        for attempt in &attempts {
            let mut result = attempt_to_result_ref(attempt);
            if let Some(session_id) = attempt.session_id {
                match self.store.get_debug_events(&session_id.to_string()).await {
                    Ok(events) => {
                        result.event_count = events.len() as u64;
                        total_events += result.event_count;
                        let stats = analytics::aggregate_statistics(&events);
                        if let Some(p95_ms) = stats.p95_ms() {
                            if p95_ms > BOTTLENECK_P95_MS {
                                bottlenecks.push(Bottleneck {
                                    function_name: attempt.candidate.function_name.clone(),
                                    p95_ms,
                                    severity: BottleneckSeverity::classify(p95_ms),
                                });
                            }
                        }
                        result.statistics = Some(stats);
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %e,
                            "failed to load events for analysis"
                        );
                    }
                }
            }
            results.push(result);
        }
        bottlenecks.sort_by(|a, b| b.p95_ms.total_cmp(&a.p95_ms));

        // Detach, best-effort.
        for attempt in &attempts {
            if let Some(session_id) = attempt.session_id {
                let detach = self.sessions.detach_uprobe(&session_id.to_string()).await;
                if !detach.success {
                    tracing::warn!(
                        session_id = %session_id,
                        error = ?detach.error,
                        "profiler detach failed"
                    );
                }
            }
        }

        let status = if attached == 0 {
            ProfileStatus::Failed
        } else if failed > 0 {
            ProfileStatus::PartialSuccess
        } else {
            ProfileStatus::Completed
        };

        ProfileReport {
            status,
            summary: ProfileRunSummary {
                functions_discovered: discovered,
                probes_attached: attached,
                probes_failed: failed,
                total_events,
                duration_secs: duration.as_secs(),
            },
            recommendation: recommendation(&bottlenecks),
            next_steps: next_steps(&bottlenecks),
            results,
            bottlenecks,
        }
    }

    /// Tick until the deadline, draining every probed session's new
    /// events into the store. Cursors are local to this run; the store
    /// dedupes any overlap with the background persister.
    async fn collect_until(&self, attempts: &[ProbeAttempt], deadline: DateTime<Utc>) {
        let mut cursors: HashMap<Uuid, DateTime<Utc>> = HashMap::new();

        loop {
            let now = Utc::now();
            if now >= deadline {
                break;
            }
            let remaining = (deadline - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(COLLECT_TICK);
            tokio::time::sleep(remaining).await;

            for attempt in attempts {
                let Some(session_id) = attempt.session_id else { continue };
                let start = cursors
                    .get(&session_id)
                    .copied()
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

                let events = match self
                    .router
                    .query_uprobe_events(&EventQuery {
                        session_id: session_id.to_string(),
                        start: Some(start),
                        end: None,
                        max_events: Some(10_000),
                    })
                    .await
                {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::debug!(session_id = %session_id, error = %e, "collect tick query failed");
                        continue;
                    }
                };
                if events.is_empty() {
                    continue;
                }

                if let Err(e) = self
                    .store
                    .insert_debug_events(&session_id.to_string(), &events)
                    .await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "collect tick insert failed");
                    continue;
                }
                if let Some(last) = events.last() {
                    cursors.insert(session_id, last.timestamp);
                }
            }
        }
    }
}

fn clamp_max_functions(requested: Option<u32>) -> u32 {
    match requested {
        None | Some(0) => DEFAULT_MAX_FUNCTIONS,
        Some(n) => n.min(MAX_FUNCTIONS_CAP),
    }
}

fn clamp_profile_duration(requested: Option<Duration>) -> Duration {
    match requested {
        None => DEFAULT_PROFILE_DURATION,
        Some(d) if d.is_zero() => DEFAULT_PROFILE_DURATION,
        Some(d) => d.min(MAX_PROFILE_DURATION),
    }
}

/// Apply the strategy filter, then truncate.
///
/// `entry_points` keeps functions whose name suggests a request handler
/// and falls back to the full set when the filter empties it.
/// `leaf_functions` and `critical_path` pass everything through until a
/// call graph is available.
fn select_functions(
    strategy: SelectionStrategy,
    candidates: Vec<FunctionCandidate>,
    max_functions: usize,
) -> Vec<FunctionCandidate> {
    let mut selected = match strategy {
        SelectionStrategy::All
        | SelectionStrategy::LeafFunctions
        | SelectionStrategy::CriticalPath => candidates,
        SelectionStrategy::EntryPoints => {
            let filtered: Vec<FunctionCandidate> = candidates
                .iter()
                .filter(|c| {
                    let name = c.function_name.to_lowercase();
                    name.contains("handle") || name.contains("serve")
                })
                .cloned()
                .collect();
            if filtered.is_empty() {
                candidates
            } else {
                filtered
            }
        }
    };
    selected.truncate(max_functions);
    selected
}

fn attempt_to_result(attempt: ProbeAttempt) -> FunctionProfileResult {
    attempt_to_result_ref(&attempt)
}

fn attempt_to_result_ref(attempt: &ProbeAttempt) -> FunctionProfileResult {
    FunctionProfileResult {
        function_name: attempt.candidate.function_name.clone(),
        agent_id: attempt.candidate.agent_id.clone(),
        session_id: attempt.session_id,
        probe_successful: attempt.session_id.is_some(),
        error: attempt.error.clone(),
        event_count: 0,
        statistics: None,
    }
}

fn failed_report(reason: String) -> ProfileReport {
    ProfileReport {
        status: ProfileStatus::Failed,
        summary: ProfileRunSummary::default(),
        results: Vec::new(),
        bottlenecks: Vec::new(),
        recommendation: reason,
        next_steps: vec![
            "Check that the service is registered and its functions are indexed".to_string(),
        ],
    }
}

fn recommendation(bottlenecks: &[Bottleneck]) -> String {
    match bottlenecks.first() {
        None => "No bottlenecks detected above the 100ms p95 threshold".to_string(),
        Some(worst) => format!(
            "{} bottleneck(s) found; start with {} (p95 {:.1}ms, {})",
            bottlenecks.len(),
            worst.function_name,
            worst.p95_ms,
            worst.severity.as_str()
        ),
    }
}

fn next_steps(bottlenecks: &[Bottleneck]) -> Vec<String> {
    if bottlenecks.is_empty() {
        vec!["Re-run with a broader query or longer duration to widen coverage".to_string()]
    } else {
        vec![
            "Attach a uprobe with capture_args to the worst function for payload detail".to_string(),
            "Query historical CPU profiles to correlate with sampled stacks".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> FunctionCandidate {
        FunctionCandidate {
            service_name: "billing".into(),
            function_name: name.into(),
            agent_id: "a1".into(),
            package_name: None,
            file_path: None,
            line_number: None,
            offset: None,
            has_dwarf: true,
        }
    }

    #[test]
    fn test_max_functions_clamping() {
        assert_eq!(clamp_max_functions(None), DEFAULT_MAX_FUNCTIONS);
        assert_eq!(clamp_max_functions(Some(0)), DEFAULT_MAX_FUNCTIONS);
        assert_eq!(clamp_max_functions(Some(30)), 30);
        assert_eq!(clamp_max_functions(Some(200)), MAX_FUNCTIONS_CAP);
    }

    #[test]
    fn test_profile_duration_clamping() {
        assert_eq!(clamp_profile_duration(None), DEFAULT_PROFILE_DURATION);
        assert_eq!(
            clamp_profile_duration(Some(Duration::from_secs(1_000))),
            MAX_PROFILE_DURATION
        );
        assert_eq!(
            clamp_profile_duration(Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_entry_points_strategy_filters_by_name() {
        let candidates = vec![
            candidate("main.HandlePayment"),
            candidate("main.computeTax"),
            candidate("api.ServeCheckout"),
        ];
        let selected = select_functions(SelectionStrategy::EntryPoints, candidates, 20);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|c| {
            let n = c.function_name.to_lowercase();
            n.contains("handle") || n.contains("serve")
        }));
    }

    #[test]
    fn test_entry_points_strategy_falls_back_when_empty() {
        let candidates = vec![candidate("main.computeTax"), candidate("main.round")];
        let selected = select_functions(SelectionStrategy::EntryPoints, candidates, 20);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_selection_truncates_to_max() {
        let candidates: Vec<FunctionCandidate> =
            (0..30).map(|i| candidate(&format!("f{i}"))).collect();
        let selected = select_functions(SelectionStrategy::All, candidates, 5);
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn test_recommendation_names_worst_bottleneck() {
        let bottlenecks = vec![
            Bottleneck {
                function_name: "main.Slow".into(),
                p95_ms: 1_200.0,
                severity: BottleneckSeverity::Critical,
            },
            Bottleneck {
                function_name: "main.Meh".into(),
                p95_ms: 150.0,
                severity: BottleneckSeverity::Minor,
            },
        ];
        let text = recommendation(&bottlenecks);
        assert!(text.contains("main.Slow"));
        assert!(text.contains("critical"));
    }
}
