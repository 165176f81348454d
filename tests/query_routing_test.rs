//! Dual-source query routing: agent-first on active sessions, store
//! fallback on failure, store-only once expired.

mod common;

use chrono::Utc;

use polyp::domain::models::{AgentEvent, ProbeConfig, SessionStatus, UprobeEvent, UprobeEventType};
use polyp::domain::ports::DebugStore;
use polyp::services::{AttachRequest, EventQuery};

use common::colony;

fn uprobe(offset_ms: i64, event_type: UprobeEventType, duration_ms: u64) -> UprobeEvent {
    UprobeEvent {
        timestamp: Utc::now() + chrono::Duration::milliseconds(offset_ms),
        event_type,
        function_name: "main.Charge".to_string(),
        thread_id: 1,
        process_id: 42,
        duration_ns: duration_ms * 1_000_000,
        arg_payload: None,
        return_payload: None,
    }
}

async fn attach(colony: &common::Colony) -> String {
    let response = colony
        .orchestrator
        .attach_uprobe(AttachRequest {
            service_name: "billing".to_string(),
            function_name: "main.Charge".to_string(),
            agent_id: Some("a1".to_string()),
            duration: Some(std::time::Duration::from_secs(120)),
            config: ProbeConfig::default(),
            sdk_addr: None,
        })
        .await;
    assert!(response.success, "{:?}", response.error);
    response.session_id.unwrap().to_string()
}

#[tokio::test]
async fn active_session_agent_failure_falls_back_to_store() {
    let colony = colony().await;
    let session_id = attach(&colony).await;

    // Earlier ticks persisted two events; then the agent went away.
    colony
        .store
        .insert_debug_events(
            &session_id,
            &[
                uprobe(-30, UprobeEventType::Entry, 0),
                uprobe(-20, UprobeEventType::Return, 10),
            ],
        )
        .await
        .unwrap();
    colony.agent.set_fail_transport(true);

    let events = colony
        .orchestrator
        .query_uprobe_events(&EventQuery::all(&session_id))
        .await
        .unwrap();

    // No error surfaced; the persisted events answered the query.
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn active_session_prefers_live_agent() {
    let colony = colony().await;
    let session_id = attach(&colony).await;

    colony
        .store
        .insert_debug_events(&session_id, &[uprobe(-50, UprobeEventType::Return, 1)])
        .await
        .unwrap();
    colony.agent.set_events(vec![
        AgentEvent::Uprobe(uprobe(-20, UprobeEventType::Entry, 0)),
        AgentEvent::Uprobe(uprobe(-10, UprobeEventType::Return, 5)),
        AgentEvent::Uprobe(uprobe(-5, UprobeEventType::Entry, 0)),
    ]);

    let events = colony
        .orchestrator
        .query_uprobe_events(&EventQuery::all(&session_id))
        .await
        .unwrap();
    // Three live events, not the single persisted one.
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn stopped_session_reads_store_even_with_live_agent() {
    let colony = colony().await;
    let session_id = attach(&colony).await;

    colony
        .store
        .insert_debug_events(&session_id, &[uprobe(-30, UprobeEventType::Return, 2)])
        .await
        .unwrap();
    colony
        .store
        .update_debug_session_status(&session_id, SessionStatus::Stopped)
        .await
        .unwrap();
    colony.agent.set_events(vec![
        AgentEvent::Uprobe(uprobe(-1, UprobeEventType::Return, 9)),
    ]);

    let events = colony
        .orchestrator
        .query_uprobe_events(&EventQuery::all(&session_id))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].duration_ns, 2_000_000);
}

#[tokio::test]
async fn debug_results_compose_statistics_outliers_and_tree() {
    let colony = colony().await;
    let session_id = attach(&colony).await;

    let mut carriers = Vec::new();
    for i in 0..40i64 {
        let base = -4_000 + i * 50;
        let duration = i + 1;
        carriers.push(AgentEvent::Uprobe(uprobe(base, UprobeEventType::Entry, 0)));
        carriers.push(AgentEvent::Uprobe(uprobe(
            base + duration,
            UprobeEventType::Return,
            duration as u64,
        )));
    }
    colony.agent.set_events(carriers);

    let results = colony
        .orchestrator
        .get_debug_results(&session_id)
        .await
        .unwrap();

    assert_eq!(results.function_name, "main.Charge");
    assert_eq!(results.statistics.total_calls, 40);
    let percentiles = results.statistics.percentiles.unwrap();
    assert!(percentiles.p50_ns <= percentiles.p95_ns);
    assert!(percentiles.p95_ns <= percentiles.p99_ns);
    assert!(percentiles.p99_ns <= percentiles.max_ns);

    // The slowest calls stand out above the p95 threshold.
    assert!(!results.slow_outliers.is_empty());
    assert!(results.slow_outliers.len() <= 10);
    assert!(results
        .slow_outliers
        .iter()
        .all(|s| s.duration_ns > percentiles.p95_ns));

    let tree = results.call_tree.unwrap();
    assert_eq!(tree.function_name, "main.Charge");
    assert_eq!(tree.call_count, 40);
}
