//! SQLite implementation of the [`DebugStore`] port.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CpuProfileSummary, DebugSession, MemoryProfileSummary, ServiceInfo, ServiceRow, SessionFilter,
    SessionStatus, UprobeEvent, UprobeEventType,
};
use crate::domain::ports::DebugStore;

#[derive(Clone)]
pub struct SqliteDebugStore {
    pool: SqlitePool,
}

impl SqliteDebugStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRowDb {
    session_id: String,
    collector_id: String,
    service_name: String,
    function_name: String,
    agent_id: String,
    sdk_addr: Option<String>,
    started_at: String,
    expires_at: String,
    status: String,
}

impl TryFrom<SessionRowDb> for DebugSession {
    type Error = DomainError;

    fn try_from(row: SessionRowDb) -> Result<Self, Self::Error> {
        Ok(DebugSession {
            session_id: Uuid::parse_str(&row.session_id)
                .map_err(|e| DomainError::Serialization(e.to_string()))?,
            collector_id: row.collector_id,
            service_name: row.service_name,
            function_name: row.function_name,
            agent_id: row.agent_id,
            sdk_addr: row.sdk_addr,
            started_at: parse_datetime(&row.started_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
            status: SessionStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Serialization(format!("bad status: {}", row.status)))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRowDb {
    timestamp: String,
    event_type: String,
    function_name: String,
    thread_id: i64,
    process_id: i64,
    duration_ns: i64,
    arg_payload: Option<String>,
    return_payload: Option<String>,
}

impl TryFrom<EventRowDb> for UprobeEvent {
    type Error = DomainError;

    fn try_from(row: EventRowDb) -> Result<Self, Self::Error> {
        let parse_payload = |s: Option<String>| -> DomainResult<Option<serde_json::Value>> {
            s.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
        };

        Ok(UprobeEvent {
            timestamp: parse_datetime(&row.timestamp)?,
            event_type: UprobeEventType::parse_str(&row.event_type).ok_or_else(|| {
                DomainError::Serialization(format!("bad event type: {}", row.event_type))
            })?,
            function_name: row.function_name,
            thread_id: row.thread_id as u32,
            process_id: row.process_id as u32,
            duration_ns: row.duration_ns.max(0) as u64,
            arg_payload: parse_payload(row.arg_payload)?,
            return_payload: parse_payload(row.return_payload)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ServiceRowDb {
    agent_id: String,
    agent_name: String,
    mesh_ipv4: String,
    mesh_ipv6: Option<String>,
    service_name: String,
    port: i64,
    process_id: Option<i64>,
    binary_path: Option<String>,
    labels: String,
    registered_at: String,
    last_seen: String,
}

impl TryFrom<ServiceRowDb> for ServiceRow {
    type Error = DomainError;

    fn try_from(row: ServiceRowDb) -> Result<Self, Self::Error> {
        let labels: HashMap<String, String> = serde_json::from_str(&row.labels)?;
        Ok(ServiceRow {
            agent_id: row.agent_id,
            agent_name: row.agent_name,
            mesh_ipv4: row.mesh_ipv4,
            mesh_ipv6: row.mesh_ipv6,
            service: ServiceInfo {
                name: row.service_name,
                port: row.port as u16,
                process_id: row.process_id.map(|p| p as u32),
                binary_path: row.binary_path,
                labels,
            },
            registered_at: parse_datetime(&row.registered_at)?,
            last_seen: parse_datetime(&row.last_seen)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CpuSummaryRowDb {
    stack_hash: String,
    stack_frame_ids: String,
    sample_count: i64,
}

#[derive(sqlx::FromRow)]
struct MemorySummaryRowDb {
    stack_hash: String,
    stack_frame_ids: String,
    alloc_bytes: i64,
    alloc_objects: i64,
}

#[async_trait]
impl DebugStore for SqliteDebugStore {
    async fn insert_debug_session(&self, session: &DebugSession) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO debug_sessions
               (session_id, collector_id, service_name, function_name, agent_id, sdk_addr,
                started_at, expires_at, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.session_id.to_string())
        .bind(&session.collector_id)
        .bind(&session.service_name)
        .bind(&session.function_name)
        .bind(&session.agent_id)
        .bind(&session.sdk_addr)
        .bind(format_datetime(session.started_at))
        .bind(format_datetime(session.expires_at))
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_debug_session(&self, session_id: &str) -> DomainResult<Option<DebugSession>> {
        let row: Option<SessionRowDb> =
            sqlx::query_as("SELECT * FROM debug_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_debug_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> DomainResult<()> {
        let result = sqlx::query("UPDATE debug_sessions SET status = ? WHERE session_id = ?")
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn list_debug_sessions(&self, filter: &SessionFilter) -> DomainResult<Vec<DebugSession>> {
        let mut sql = String::from("SELECT * FROM debug_sessions WHERE 1=1");
        if filter.service_name.is_some() {
            sql.push_str(" AND service_name = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY started_at DESC");

        let mut query = sqlx::query_as::<_, SessionRowDb>(&sql);
        if let Some(service) = &filter.service_name {
            query = query.bind(service);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_debug_events(
        &self,
        session_id: &str,
        events: &[UprobeEvent],
    ) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for event in events {
            let arg_payload = event
                .arg_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let return_payload = event
                .return_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            // Duplicate composites fall into the UNIQUE ... ON CONFLICT
            // IGNORE clause and report zero rows affected.
            let result = sqlx::query(
                r#"INSERT INTO debug_events
                   (session_id, timestamp, event_type, function_name, thread_id, process_id,
                    duration_ns, arg_payload, return_payload)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(session_id)
            .bind(format_datetime(event.timestamp))
            .bind(event.event_type.as_str())
            .bind(&event.function_name)
            .bind(i64::from(event.thread_id))
            .bind(i64::from(event.process_id))
            .bind(event.duration_ns as i64)
            .bind(arg_payload)
            .bind(return_payload)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_debug_events(&self, session_id: &str) -> DomainResult<Vec<UprobeEvent>> {
        let rows: Vec<EventRowDb> = sqlx::query_as(
            r#"SELECT timestamp, event_type, function_name, thread_id, process_id,
                      duration_ns, arg_payload, return_payload
               FROM debug_events WHERE session_id = ? ORDER BY id ASC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn upsert_service(&self, row: &ServiceRow) -> DomainResult<()> {
        let labels = serde_json::to_string(&row.service.labels)?;

        sqlx::query(
            r#"INSERT INTO agent_services
               (agent_id, agent_name, mesh_ipv4, mesh_ipv6, service_name, port, process_id,
                binary_path, labels, registered_at, last_seen)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (agent_id, service_name) DO UPDATE SET
                   agent_name = excluded.agent_name,
                   mesh_ipv4 = excluded.mesh_ipv4,
                   mesh_ipv6 = excluded.mesh_ipv6,
                   port = excluded.port,
                   process_id = excluded.process_id,
                   binary_path = excluded.binary_path,
                   labels = excluded.labels,
                   last_seen = excluded.last_seen"#,
        )
        .bind(&row.agent_id)
        .bind(&row.agent_name)
        .bind(&row.mesh_ipv4)
        .bind(&row.mesh_ipv6)
        .bind(&row.service.name)
        .bind(i64::from(row.service.port))
        .bind(row.service.process_id.map(i64::from))
        .bind(&row.service.binary_path)
        .bind(labels)
        .bind(format_datetime(row.registered_at))
        .bind(format_datetime(row.last_seen))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_service_last_seen(
        &self,
        agent_id: &str,
        last_seen: DateTime<Utc>,
    ) -> DomainResult<()> {
        sqlx::query("UPDATE agent_services SET last_seen = ? WHERE agent_id = ?")
            .bind(format_datetime(last_seen))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all_services(&self) -> DomainResult<Vec<ServiceRow>> {
        let rows: Vec<ServiceRowDb> = sqlx::query_as("SELECT * FROM agent_services")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn query_cpu_profile_summaries(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<CpuProfileSummary>> {
        let rows: Vec<CpuSummaryRowDb> = sqlx::query_as(
            r#"SELECT stack_hash, stack_frame_ids, sample_count
               FROM cpu_profile_summaries
               WHERE service_name = ? AND window_end >= ? AND window_start <= ?"#,
        )
        .bind(service_name)
        .bind(format_datetime(start))
        .bind(format_datetime(end))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(CpuProfileSummary {
                    stack_hash: r.stack_hash,
                    stack_frame_ids: serde_json::from_str(&r.stack_frame_ids)?,
                    sample_count: r.sample_count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn query_memory_profile_summaries(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<MemoryProfileSummary>> {
        let rows: Vec<MemorySummaryRowDb> = sqlx::query_as(
            r#"SELECT stack_hash, stack_frame_ids, alloc_bytes, alloc_objects
               FROM memory_profile_summaries
               WHERE service_name = ? AND window_end >= ? AND window_start <= ?"#,
        )
        .bind(service_name)
        .bind(format_datetime(start))
        .bind(format_datetime(end))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(MemoryProfileSummary {
                    stack_hash: r.stack_hash,
                    stack_frame_ids: serde_json::from_str(&r.stack_frame_ids)?,
                    alloc_bytes: r.alloc_bytes.max(0) as u64,
                    alloc_objects: r.alloc_objects.max(0) as u64,
                })
            })
            .collect()
    }

    async fn decode_stack_frames(&self, frame_ids: &[i64]) -> DomainResult<Vec<String>> {
        let mut names = Vec::with_capacity(frame_ids.len());
        for id in frame_ids {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT frame_name FROM stack_frames WHERE frame_id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            names.push(row.map_or_else(|| format!("frame#{id}"), |(name,)| name));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Duration;

    async fn store() -> SqliteDebugStore {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteDebugStore::new(pool)
    }

    fn session() -> DebugSession {
        let now = Utc::now();
        DebugSession {
            session_id: Uuid::new_v4(),
            collector_id: "col-1".into(),
            service_name: "billing".into(),
            function_name: "main.Charge".into(),
            agent_id: "agent-1".into(),
            sdk_addr: Some("sdk://10.0.0.1:4000".into()),
            started_at: now,
            expires_at: now + Duration::seconds(60),
            status: SessionStatus::Active,
        }
    }

    fn event(offset_ms: i64, event_type: UprobeEventType, thread_id: u32) -> UprobeEvent {
        UprobeEvent {
            timestamp: Utc::now() + Duration::milliseconds(offset_ms),
            event_type,
            function_name: "main.Charge".into(),
            thread_id,
            process_id: 77,
            duration_ns: 5_000_000,
            arg_payload: None,
            return_payload: None,
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store().await;
        let session = session();
        store.insert_debug_session(&session).await.unwrap();

        let fetched = store
            .get_debug_session(&session.session_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.session_id, session.session_id);
        assert_eq!(fetched.collector_id, "col-1");
        assert_eq!(fetched.status, SessionStatus::Active);
        assert_eq!(fetched.started_at, session.started_at);
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let store = store().await;
        assert!(store.get_debug_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_update() {
        let store = store().await;
        let session = session();
        store.insert_debug_session(&session).await.unwrap();

        store
            .update_debug_session_status(&session.session_id.to_string(), SessionStatus::Stopped)
            .await
            .unwrap();
        let fetched = store
            .get_debug_session(&session.session_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, SessionStatus::Stopped);

        let missing = store
            .update_debug_session_status("missing", SessionStatus::Stopped)
            .await;
        assert!(matches!(missing, Err(DomainError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sessions_filters() {
        let store = store().await;
        let mut a = session();
        a.service_name = "billing".into();
        let mut b = session();
        b.service_name = "checkout".into();
        b.status = SessionStatus::Stopped;
        store.insert_debug_session(&a).await.unwrap();
        store.insert_debug_session(&b).await.unwrap();

        let all = store
            .list_debug_sessions(&SessionFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let billing = store
            .list_debug_sessions(&SessionFilter {
                service_name: Some("billing".into()),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(billing.len(), 1);
        assert_eq!(billing[0].session_id, a.session_id);

        let active = store
            .list_debug_sessions(&SessionFilter::active())
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, a.session_id);
    }

    #[tokio::test]
    async fn test_event_insert_is_idempotent() {
        let store = store().await;
        let session = session();
        let id = session.session_id.to_string();
        store.insert_debug_session(&session).await.unwrap();

        let events = vec![
            event(0, UprobeEventType::Entry, 1),
            event(10, UprobeEventType::Return, 1),
        ];
        let first = store.insert_debug_events(&id, &events).await.unwrap();
        assert_eq!(first, 2);

        // Same composite keys again: nothing new lands.
        let second = store.insert_debug_events(&id, &events).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.get_debug_events(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_events_preserve_insertion_order() {
        let store = store().await;
        let session = session();
        let id = session.session_id.to_string();
        store.insert_debug_session(&session).await.unwrap();

        let events = vec![
            event(30, UprobeEventType::Return, 2),
            event(0, UprobeEventType::Entry, 2),
        ];
        store.insert_debug_events(&id, &events).await.unwrap();

        let fetched = store.get_debug_events(&id).await.unwrap();
        assert_eq!(fetched.len(), 2);
        // Insertion order, not timestamp order.
        assert_eq!(fetched[0].event_type, UprobeEventType::Return);
    }

    #[tokio::test]
    async fn test_service_rows_round_trip() {
        let store = store().await;
        let now = Utc::now();
        let row = ServiceRow {
            agent_id: "agent-1".into(),
            agent_name: "host-1".into(),
            mesh_ipv4: "10.0.0.1".into(),
            mesh_ipv6: None,
            service: ServiceInfo::new("billing", 8080)
                .with_process_id(42)
                .with_label("env", "prod"),
            registered_at: now,
            last_seen: now,
        };
        store.upsert_service(&row).await.unwrap();

        // Upsert with a changed address keeps the primary key.
        let mut updated = row.clone();
        updated.mesh_ipv4 = "10.0.0.2".into();
        store.upsert_service(&updated).await.unwrap();

        let rows = store.list_all_services().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mesh_ipv4, "10.0.0.2");
        assert_eq!(rows[0].service.labels.get("env").unwrap(), "prod");

        let later = now + Duration::seconds(30);
        store.update_service_last_seen("agent-1", later).await.unwrap();
        let rows = store.list_all_services().await.unwrap();
        assert_eq!(rows[0].last_seen, later);
    }

    #[tokio::test]
    async fn test_decode_stack_frames_with_placeholder() {
        let store = store().await;
        sqlx::query("INSERT INTO stack_frames (frame_id, frame_name) VALUES (1, 'main.Serve')")
            .execute(&store.pool)
            .await
            .unwrap();

        let names = store.decode_stack_frames(&[1, 99]).await.unwrap();
        assert_eq!(names, vec!["main.Serve".to_string(), "frame#99".to_string()]);
    }

    #[tokio::test]
    async fn test_profile_summary_window_query() {
        let store = store().await;
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO cpu_profile_summaries
               (service_name, stack_hash, stack_frame_ids, sample_count, window_start, window_end)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind("billing")
        .bind("h1")
        .bind("[1,2]")
        .bind(10i64)
        .bind(format_datetime(now - Duration::minutes(10)))
        .bind(format_datetime(now - Duration::minutes(5)))
        .execute(&store.pool)
        .await
        .unwrap();

        let hit = store
            .query_cpu_profile_summaries("billing", now - Duration::minutes(7), now)
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].stack_frame_ids, vec![1, 2]);

        let miss = store
            .query_cpu_profile_summaries("billing", now - Duration::minutes(2), now)
            .await
            .unwrap();
        assert!(miss.is_empty());
    }
}
