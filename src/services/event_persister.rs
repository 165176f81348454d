//! Background event persister.
//!
//! A single long-lived task drains events from every active session into
//! the store on a fixed tick. Per-session cursors remember the last
//! persisted timestamp so each tick only pulls new events; the store's
//! idempotent insert absorbs the overlap when the detach-time drain
//! races a tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::{interval, Instant};

use crate::domain::models::SessionFilter;
use crate::domain::ports::DebugStore;
use crate::services::query_router::{EventQuery, QueryRouter};

/// Configuration for the event persister.
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// Interval between drain ticks.
    pub tick_interval: Duration,
    /// Overall deadline for one tick.
    pub tick_deadline: Duration,
    /// Maximum events pulled per session per tick.
    pub batch_size: u32,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            tick_deadline: Duration::from_secs(30),
            batch_size: 10_000,
        }
    }
}

impl PersisterConfig {
    pub fn from_settings(settings: &crate::domain::models::config::PersisterConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(settings.tick_interval_secs),
            tick_deadline: Duration::from_secs(settings.tick_deadline_secs),
            batch_size: settings.batch_size,
        }
    }
}

/// Running counters for the persister.
#[derive(Debug, Clone, Default)]
pub struct PersisterStatus {
    pub running: bool,
    pub total_ticks: u64,
    pub events_persisted: u64,
    pub last_tick: Option<Instant>,
}

/// Handle to observe and stop the persister.
#[derive(Clone)]
pub struct PersisterHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<PersisterStatus>>,
}

impl PersisterHandle {
    /// Request termination. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> PersisterStatus {
        self.status.read().await.clone()
    }
}

pub struct EventPersister {
    router: Arc<QueryRouter>,
    store: Arc<dyn DebugStore>,
    config: PersisterConfig,
    /// session_id -> last persisted event timestamp.
    cursors: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    status: Arc<RwLock<PersisterStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl EventPersister {
    pub fn new(
        router: Arc<QueryRouter>,
        store: Arc<dyn DebugStore>,
        config: PersisterConfig,
    ) -> Self {
        Self {
            router,
            store,
            config,
            cursors: Arc::new(RwLock::new(HashMap::new())),
            status: Arc::new(RwLock::new(PersisterStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> PersisterHandle {
        PersisterHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Spawn the drain loop onto the runtime.
    pub fn spawn(self) -> PersisterHandle {
        let handle = self.handle();
        tokio::spawn(async move {
            self.run_loop().await;
        });
        handle
    }

    async fn run_loop(self) {
        {
            let mut status = self.status.write().await;
            status.running = true;
        }
        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "event persister started"
        );

        let mut ticker = interval(self.config.tick_interval);
        // The first tick of a tokio interval fires immediately; skip it
        // so freshly attached sessions get a full interval of data.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }

            match tokio::time::timeout(self.config.tick_deadline, self.run_once()).await {
                Ok(persisted) => {
                    let mut status = self.status.write().await;
                    status.total_ticks += 1;
                    status.events_persisted += persisted;
                    status.last_tick = Some(Instant::now());
                }
                Err(_) => {
                    tracing::warn!(
                        deadline_secs = self.config.tick_deadline.as_secs(),
                        "persister tick exceeded deadline"
                    );
                }
            }

            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
        }

        {
            let mut status = self.status.write().await;
            status.running = false;
        }
        tracing::info!("event persister stopped");
    }

    /// One drain tick over every active, unexpired session.
    ///
    /// Per-session failures are logged and skipped; the tick always
    /// visits the remaining sessions. Returns the number of events
    /// persisted.
    pub async fn run_once(&self) -> u64 {
        let sessions = match self.store.list_debug_sessions(&SessionFilter::active()).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "persister failed to list active sessions");
                return 0;
            }
        };

        let now = Utc::now();
        let mut total = 0u64;
        for session in sessions {
            if now > session.expires_at {
                continue;
            }
            let session_id = session.session_id.to_string();
            total += self.drain_session(&session_id).await;
        }
        total
    }

    async fn drain_session(&self, session_id: &str) -> u64 {
        let cursor = {
            let cursors = self.cursors.read().await;
            cursors
                .get(session_id)
                .copied()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        };

        let events = match self
            .router
            .query_uprobe_events(&EventQuery {
                session_id: session_id.to_string(),
                start: Some(cursor),
                end: None,
                max_events: Some(self.config.batch_size),
            })
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "persister failed to query events");
                return 0;
            }
        };

        if events.is_empty() {
            return 0;
        }

        let inserted = match self.store.insert_debug_events(session_id, &events).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "persister failed to insert events");
                return 0;
            }
        };

        // Cursor = last event's timestamp, written only after a
        // successful insert. The next window starts at the cursor
        // inclusively, so the boundary event is re-fetched each tick;
        // the store's (session_id, timestamp, event_type, thread_id)
        // unique composite drops the duplicate row.
        if let Some(last) = events.last() {
            let mut cursors = self.cursors.write().await;
            cursors.insert(session_id.to_string(), last.timestamp);
        }

        tracing::debug!(session_id, fetched = events.len(), inserted, "persisted session events");
        inserted
    }
}
