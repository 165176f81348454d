//! Pure event analytics: call-tree reconstruction, percentile
//! statistics, slow-outlier extraction, and historical profile
//! aggregation.
//!
//! Everything here is stateless; functions take event or summary slices
//! and return protocol-level records.

use std::collections::HashMap;

use crate::domain::models::{
    CallTreeNode, CpuProfileSummary, DurationPercentiles, DurationStats, FunctionBytes,
    MemoryProfileSummary, MemoryStackSample, SlowCall, TypeBytes, UprobeEvent, UprobeEventType,
    MULTI_ROOT_NAME,
};

/// Cap on reported slow outliers.
pub const MAX_SLOW_OUTLIERS: usize = 10;

/// Per-function rows reported in a memory breakdown.
pub const TOP_FUNCTIONS: usize = 20;

/// Per-type rows reported in a memory breakdown.
pub const TOP_TYPES: usize = 10;

/// A call frame opened by an entry event and not yet closed.
struct OpenFrame {
    function_name: String,
    entry_time: chrono::DateTime<chrono::Utc>,
    children: Vec<CallTreeNode>,
}

/// Reconstruct a call tree from raw entry/return events.
///
/// Events are grouped per thread, sorted by timestamp, and replayed
/// against a call stack. Unmatched returns are dropped; entries that
/// never return are dropped along with their subtree. Roots from all
/// threads are aggregated by function name; when multiple distinct root
/// functions remain, they are wrapped under a synthetic
/// [`MULTI_ROOT_NAME`] node. Nodes whose total time exceeds
/// `p95_threshold_ns` are flagged slow.
pub fn build_call_tree(events: &[UprobeEvent], p95_threshold_ns: u64) -> Option<CallTreeNode> {
    let mut by_thread: HashMap<u32, Vec<&UprobeEvent>> = HashMap::new();
    for event in events {
        by_thread.entry(event.thread_id).or_default().push(event);
    }

    let mut roots: Vec<CallTreeNode> = Vec::new();
    for (_thread_id, mut thread_events) in by_thread {
        thread_events.sort_by_key(|e| e.timestamp);

        let mut stack: Vec<OpenFrame> = Vec::new();
        for event in thread_events {
            match event.event_type {
                UprobeEventType::Entry => stack.push(OpenFrame {
                    function_name: event.function_name.clone(),
                    entry_time: event.timestamp,
                    children: Vec::new(),
                }),
                UprobeEventType::Return => {
                    // A return with no open frame has no pairing entry.
                    let Some(frame) = stack.pop() else { continue };

                    let total_ns = event
                        .timestamp
                        .signed_duration_since(frame.entry_time)
                        .num_nanoseconds()
                        .unwrap_or(0)
                        .max(0) as u64;
                    let child_total: u64 =
                        frame.children.iter().map(|c| c.total_duration_ns).sum();

                    let node = CallTreeNode {
                        function_name: frame.function_name,
                        total_duration_ns: total_ns,
                        self_duration_ns: total_ns.saturating_sub(child_total),
                        call_count: 1,
                        is_slow: false,
                        children: frame.children,
                    };

                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => roots.push(node),
                    }
                }
            }
        }
    }

    if roots.is_empty() {
        return None;
    }

    let mut merged = merge_by_name(roots);
    let mut root = if merged.len() == 1 {
        merged.pop().expect("single merged root")
    } else {
        let total: u64 = merged.iter().map(|n| n.total_duration_ns).sum();
        let calls: u64 = merged.iter().map(|n| n.call_count).sum();
        CallTreeNode {
            function_name: MULTI_ROOT_NAME.to_string(),
            total_duration_ns: total,
            self_duration_ns: 0,
            call_count: calls,
            is_slow: false,
            children: merged,
        }
    };

    finalize(&mut root, p95_threshold_ns);
    Some(root)
}

/// Merge sibling nodes sharing a function name: counts and times sum,
/// children merge recursively.
fn merge_by_name(nodes: Vec<CallTreeNode>) -> Vec<CallTreeNode> {
    let mut merged: Vec<CallTreeNode> = Vec::new();
    for node in nodes {
        if let Some(existing) = merged
            .iter_mut()
            .find(|m| m.function_name == node.function_name)
        {
            existing.total_duration_ns += node.total_duration_ns;
            existing.self_duration_ns += node.self_duration_ns;
            existing.call_count += node.call_count;
            let children: Vec<CallTreeNode> = std::mem::take(&mut existing.children)
                .into_iter()
                .chain(node.children)
                .collect();
            existing.children = merge_by_name(children);
        } else {
            merged.push(node);
        }
    }
    merged
}

/// Flag slow nodes and order children by total time, recursively.
fn finalize(node: &mut CallTreeNode, p95_threshold_ns: u64) {
    node.is_slow = node.total_duration_ns > p95_threshold_ns;
    node.children
        .sort_by(|a, b| b.total_duration_ns.cmp(&a.total_duration_ns));
    for child in &mut node.children {
        finalize(child, p95_threshold_ns);
    }
}

/// Percentile statistics over completed calls.
///
/// Durations come from return events with a positive `duration_ns`.
/// Percentile rank is nearest-rank with index `floor(N * p)`, clamped to
/// `N - 1`. With no usable durations the call count approximates half
/// the raw event count and no percentiles are emitted.
pub fn aggregate_statistics(events: &[UprobeEvent]) -> DurationStats {
    let mut durations: Vec<u64> = events
        .iter()
        .filter(|e| e.is_return() && e.duration_ns > 0)
        .map(|e| e.duration_ns)
        .collect();

    if durations.is_empty() {
        return DurationStats {
            total_calls: (events.len() / 2) as u64,
            percentiles: None,
        };
    }

    durations.sort_unstable();
    let n = durations.len();
    let rank = |p: f64| durations[((n as f64 * p) as usize).min(n - 1)];

    DurationStats {
        total_calls: n as u64,
        percentiles: Some(DurationPercentiles {
            p50_ns: rank(0.50),
            p95_ns: rank(0.95),
            p99_ns: rank(0.99),
            max_ns: durations[n - 1],
        }),
    }
}

/// Completed calls slower than the p95 threshold, worst first, capped at
/// [`MAX_SLOW_OUTLIERS`].
pub fn find_slow_outliers(events: &[UprobeEvent], p95_threshold_ns: u64) -> Vec<SlowCall> {
    let mut slow: Vec<SlowCall> = events
        .iter()
        .filter(|e| e.is_return() && e.duration_ns > p95_threshold_ns)
        .map(|e| SlowCall {
            function_name: e.function_name.clone(),
            process_id: e.process_id,
            thread_id: e.thread_id,
            duration_ns: e.duration_ns,
            timestamp: e.timestamp,
        })
        .collect();

    slow.sort_by(|a, b| b.duration_ns.cmp(&a.duration_ns));
    slow.truncate(MAX_SLOW_OUTLIERS);
    slow
}

/// Merge persisted CPU summary rows by stack hash, summing sample
/// counts. Heaviest stacks first.
pub fn merge_cpu_summaries(rows: Vec<CpuProfileSummary>) -> Vec<CpuProfileSummary> {
    let mut merged: Vec<CpuProfileSummary> = Vec::new();
    for row in rows {
        if let Some(existing) = merged.iter_mut().find(|m| m.stack_hash == row.stack_hash) {
            existing.sample_count += row.sample_count;
        } else {
            merged.push(row);
        }
    }
    merged.sort_by(|a, b| b.sample_count.cmp(&a.sample_count));
    merged
}

/// Merge persisted memory summary rows by stack hash, summing bytes and
/// object counts. Largest stacks first.
pub fn merge_memory_summaries(rows: Vec<MemoryProfileSummary>) -> Vec<MemoryProfileSummary> {
    let mut merged: Vec<MemoryProfileSummary> = Vec::new();
    for row in rows {
        if let Some(existing) = merged.iter_mut().find(|m| m.stack_hash == row.stack_hash) {
            existing.alloc_bytes += row.alloc_bytes;
            existing.alloc_objects += row.alloc_objects;
        } else {
            merged.push(row);
        }
    }
    merged.sort_by(|a, b| b.alloc_bytes.cmp(&a.alloc_bytes));
    merged
}

/// Classify an allocation by its leaf frame.
pub fn classify_alloc_type(leaf_frame: &str) -> String {
    const RULES: &[(&[&str], &str)] = &[
        (&["makeslice", "growslice"], "slice"),
        (&["makemap", "mapassign"], "map"),
        (&["newobject", "mallocgc"], "object"),
        (&["concatstrings", "slicebytetostring", "stringtoslicebyte"], "string"),
        (&["makechan"], "channel"),
        (&["newproc", "mstart"], "goroutine"),
    ];

    for (needles, name) in RULES {
        if needles.iter().any(|n| leaf_frame.contains(n)) {
            return (*name).to_string();
        }
    }
    shorten_frame(leaf_frame)
}

/// Strip the package path from a frame name.
fn shorten_frame(frame: &str) -> String {
    frame.rsplit('/').next().unwrap_or(frame).to_string()
}

/// Per-function and per-type allocation breakdown over decoded samples.
///
/// A function's share sums bytes of every stack it appears in (counted
/// once per stack); a type is attributed by the stack's leaf frame.
/// Returns the top [`TOP_FUNCTIONS`] functions and [`TOP_TYPES`] types,
/// largest first, each with its percentage of total bytes.
pub fn memory_breakdown(samples: &[MemoryStackSample]) -> (Vec<FunctionBytes>, Vec<TypeBytes>) {
    let total_bytes: u64 = samples.iter().map(|s| s.alloc_bytes).sum();
    let pct = |bytes: u64| {
        if total_bytes == 0 {
            0.0
        } else {
            bytes as f64 / total_bytes as f64 * 100.0
        }
    };

    let mut by_function: HashMap<&str, (u64, u64)> = HashMap::new();
    let mut by_type: HashMap<String, (u64, u64)> = HashMap::new();

    for sample in samples {
        let mut seen: Vec<&str> = Vec::new();
        for frame in &sample.frames {
            if seen.contains(&frame.as_str()) {
                continue;
            }
            seen.push(frame);
            let entry = by_function.entry(frame).or_insert((0, 0));
            entry.0 += sample.alloc_bytes;
            entry.1 += sample.alloc_objects;
        }

        if let Some(leaf) = sample.frames.last() {
            let entry = by_type.entry(classify_alloc_type(leaf)).or_insert((0, 0));
            entry.0 += sample.alloc_bytes;
            entry.1 += sample.alloc_objects;
        }
    }

    let mut functions: Vec<FunctionBytes> = by_function
        .into_iter()
        .map(|(name, (bytes, objects))| FunctionBytes {
            function_name: name.to_string(),
            alloc_bytes: bytes,
            alloc_objects: objects,
            percentage: pct(bytes),
        })
        .collect();
    functions.sort_by(|a, b| b.alloc_bytes.cmp(&a.alloc_bytes));
    functions.truncate(TOP_FUNCTIONS);

    let mut types: Vec<TypeBytes> = by_type
        .into_iter()
        .map(|(name, (bytes, objects))| TypeBytes {
            type_name: name,
            alloc_bytes: bytes,
            alloc_objects: objects,
            percentage: pct(bytes),
        })
        .collect();
    types.sort_by(|a, b| b.alloc_bytes.cmp(&a.alloc_bytes));
    types.truncate(TOP_TYPES);

    (functions, types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn event(
        offset_ms: i64,
        event_type: UprobeEventType,
        function: &str,
        thread_id: u32,
        duration_ms: u64,
    ) -> UprobeEvent {
        UprobeEvent {
            timestamp: base_time() + Duration::milliseconds(offset_ms),
            event_type,
            function_name: function.to_string(),
            thread_id,
            process_id: 1000,
            duration_ns: duration_ms * 1_000_000,
            arg_payload: None,
            return_payload: None,
        }
    }

    const MS: u64 = 1_000_000;

    #[test]
    fn test_simple_linear_call_tree() {
        // entry A, entry B, return B (20 ms), return A (40 ms) on one thread.
        let events = vec![
            event(0, UprobeEventType::Entry, "A", 1, 0),
            event(10, UprobeEventType::Entry, "B", 1, 0),
            event(30, UprobeEventType::Return, "B", 1, 20),
            event(40, UprobeEventType::Return, "A", 1, 40),
        ];

        let root = build_call_tree(&events, 100 * MS).unwrap();
        assert_eq!(root.function_name, "A");
        assert_eq!(root.total_duration_ns, 40 * MS);
        assert_eq!(root.self_duration_ns, 20 * MS);
        assert_eq!(root.call_count, 1);
        assert!(!root.is_slow);

        assert_eq!(root.children.len(), 1);
        let child = &root.children[0];
        assert_eq!(child.function_name, "B");
        assert_eq!(child.total_duration_ns, 20 * MS);
        assert_eq!(child.self_duration_ns, 20 * MS);
        assert!(!child.is_slow);
    }

    #[test]
    fn test_multiple_invocations_aggregate() {
        // Two identical A -> B sequences, 30 ms / 10 ms each.
        let mut events = Vec::new();
        for base in [0, 100] {
            events.push(event(base, UprobeEventType::Entry, "A", 1, 0));
            events.push(event(base + 5, UprobeEventType::Entry, "B", 1, 0));
            events.push(event(base + 15, UprobeEventType::Return, "B", 1, 10));
            events.push(event(base + 30, UprobeEventType::Return, "A", 1, 30));
        }

        let root = build_call_tree(&events, 100 * MS).unwrap();
        assert_eq!(root.function_name, "A");
        assert_eq!(root.call_count, 2);
        assert_eq!(root.total_duration_ns, 60 * MS);

        let child = root.find_child("B").unwrap();
        assert_eq!(child.call_count, 2);
        assert_eq!(child.total_duration_ns, 20 * MS);
    }

    #[test]
    fn test_multi_root_synthetic_node() {
        // Two distinct roots: Fast (10 ms) and Slow (100 ms), threshold 50 ms.
        let events = vec![
            event(0, UprobeEventType::Entry, "Fast", 1, 0),
            event(10, UprobeEventType::Return, "Fast", 1, 10),
            event(20, UprobeEventType::Entry, "Slow", 1, 0),
            event(120, UprobeEventType::Return, "Slow", 1, 100),
        ];

        let root = build_call_tree(&events, 50 * MS).unwrap();
        assert_eq!(root.function_name, MULTI_ROOT_NAME);
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.self_duration_ns, 0);

        // Children sorted by total time descending.
        assert_eq!(root.children[0].function_name, "Slow");
        assert!(root.children[0].is_slow);
        assert!(!root.children[1].is_slow);
    }

    #[test]
    fn test_threads_replay_independently() {
        // The same function on two threads stays one root after merge.
        let events = vec![
            event(0, UprobeEventType::Entry, "Handle", 1, 0),
            event(0, UprobeEventType::Entry, "Handle", 2, 0),
            event(10, UprobeEventType::Return, "Handle", 1, 10),
            event(20, UprobeEventType::Return, "Handle", 2, 20),
        ];

        let root = build_call_tree(&events, u64::MAX).unwrap();
        assert_eq!(root.function_name, "Handle");
        assert_eq!(root.call_count, 2);
        assert_eq!(root.total_duration_ns, 30 * MS);
    }

    #[test]
    fn test_unmatched_return_is_dropped() {
        let events = vec![
            event(0, UprobeEventType::Return, "Orphan", 1, 5),
            event(10, UprobeEventType::Entry, "A", 1, 0),
            event(20, UprobeEventType::Return, "A", 1, 10),
        ];

        let root = build_call_tree(&events, u64::MAX).unwrap();
        assert_eq!(root.function_name, "A");
        assert_eq!(root.node_count(), 1);
    }

    #[test]
    fn test_empty_events_yield_no_tree() {
        assert!(build_call_tree(&[], 0).is_none());
    }

    #[test]
    fn test_self_time_never_negative() {
        // Child interval recorded longer than the parent's (skewed input).
        let events = vec![
            event(0, UprobeEventType::Entry, "A", 1, 0),
            event(1, UprobeEventType::Entry, "B", 1, 0),
            event(50, UprobeEventType::Return, "B", 1, 49),
            event(40, UprobeEventType::Return, "A", 1, 40),
        ];

        // Timestamp sort puts A's return before B's, so B becomes the
        // survivor; either way no node may report negative self time.
        if let Some(root) = build_call_tree(&events, u64::MAX) {
            let mut stack = vec![&root];
            while let Some(node) = stack.pop() {
                let child_total: u64 = node.children.iter().map(|c| c.total_duration_ns).sum();
                assert!(node.total_duration_ns >= node.self_duration_ns);
                assert_eq!(
                    node.self_duration_ns,
                    node.total_duration_ns.saturating_sub(child_total)
                );
                stack.extend(node.children.iter());
            }
        }
    }

    #[test]
    fn test_statistics_percentile_ordering() {
        let events: Vec<UprobeEvent> = (1..=100)
            .map(|i| event(i, UprobeEventType::Return, "F", 1, i as u64))
            .collect();

        let stats = aggregate_statistics(&events);
        assert_eq!(stats.total_calls, 100);
        let p = stats.percentiles.unwrap();
        assert!(p.p50_ns <= p.p95_ns);
        assert!(p.p95_ns <= p.p99_ns);
        assert!(p.p99_ns <= p.max_ns);
        assert_eq!(p.max_ns, 100 * MS);
        // Nearest-rank: index floor(100 * 0.5) = 50 -> 51st value.
        assert_eq!(p.p50_ns, 51 * MS);
    }

    #[test]
    fn test_statistics_without_durations() {
        let events = vec![
            event(0, UprobeEventType::Entry, "F", 1, 0),
            event(1, UprobeEventType::Entry, "F", 2, 0),
            event(2, UprobeEventType::Entry, "F", 3, 0),
        ];
        let stats = aggregate_statistics(&events);
        assert_eq!(stats.total_calls, 1); // 3 / 2
        assert!(stats.percentiles.is_none());
    }

    #[test]
    fn test_statistics_empty() {
        let stats = aggregate_statistics(&[]);
        assert_eq!(stats.total_calls, 0);
        assert!(stats.percentiles.is_none());
    }

    #[test]
    fn test_slow_outliers_threshold_and_cap() {
        let events: Vec<UprobeEvent> = (1..=30)
            .map(|i| event(i, UprobeEventType::Return, "F", 1, i as u64))
            .collect();

        let slow = find_slow_outliers(&events, 10 * MS);
        assert_eq!(slow.len(), MAX_SLOW_OUTLIERS);
        assert!(slow.iter().all(|s| s.duration_ns > 10 * MS));
        // Worst first.
        assert_eq!(slow[0].duration_ns, 30 * MS);
        assert!(slow.windows(2).all(|w| w[0].duration_ns >= w[1].duration_ns));
    }

    #[test]
    fn test_merge_cpu_summaries() {
        let rows = vec![
            CpuProfileSummary {
                stack_hash: "h1".into(),
                stack_frame_ids: vec![1, 2],
                sample_count: 5,
            },
            CpuProfileSummary {
                stack_hash: "h2".into(),
                stack_frame_ids: vec![3],
                sample_count: 20,
            },
            CpuProfileSummary {
                stack_hash: "h1".into(),
                stack_frame_ids: vec![1, 2],
                sample_count: 7,
            },
        ];

        let merged = merge_cpu_summaries(rows);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].stack_hash, "h2");
        assert_eq!(merged[1].sample_count, 12);
    }

    #[test]
    fn test_classify_alloc_type() {
        assert_eq!(classify_alloc_type("runtime.makeslice"), "slice");
        assert_eq!(classify_alloc_type("runtime.mapassign_faststr"), "map");
        assert_eq!(classify_alloc_type("runtime.newobject"), "object");
        assert_eq!(classify_alloc_type("runtime.concatstrings"), "string");
        assert_eq!(classify_alloc_type("runtime.makechan"), "channel");
        assert_eq!(classify_alloc_type("runtime.newproc"), "goroutine");
        assert_eq!(
            classify_alloc_type("github.com/acme/billing.Charge"),
            "billing.Charge"
        );
    }

    #[test]
    fn test_memory_breakdown_percentages() {
        let samples = vec![
            MemoryStackSample {
                frames: vec!["main.Serve".into(), "runtime.makeslice".into()],
                alloc_bytes: 750,
                alloc_objects: 10,
            },
            MemoryStackSample {
                frames: vec!["main.Serve".into(), "runtime.makemap".into()],
                alloc_bytes: 250,
                alloc_objects: 2,
            },
        ];

        let (functions, types) = memory_breakdown(&samples);

        let serve = functions
            .iter()
            .find(|f| f.function_name == "main.Serve")
            .unwrap();
        assert_eq!(serve.alloc_bytes, 1000);
        assert!((serve.percentage - 100.0).abs() < 1e-9);

        // Types partition the samples, so their shares sum to 100%.
        let type_pct: f64 = types.iter().map(|t| t.percentage).sum();
        assert!((type_pct - 100.0).abs() < 1e-9);
        assert_eq!(types[0].type_name, "slice");
        assert!((types[0].percentage - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_memory_breakdown_empty() {
        let (functions, types) = memory_breakdown(&[]);
        assert!(functions.is_empty());
        assert!(types.is_empty());
    }
}
