//! Connection Supervisor (C5): owns one Log Source + parser pipeline per
//! server, with reconnect-with-backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{EventBus, PlayerTracker};
use crate::config::LogSourceConfig;
use crate::error::{GarrisonError, Result};
use crate::event::ParsedEvent;
use crate::ids::ServerId;
use crate::metrics::MetricsWindow;
use crate::parser::ParserRegistry;
use crate::source::{self, LogSource};
use crate::store::EventStore;

/// Fallback used by callers (tests, and any `ConnectionSupervisor` built
/// without a configured cap) that don't thread `backoff_cap_secs` through.
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// The exponential backoff table. `attempt` counts prior failed attempts
/// (0 = never attempted, always allowed through). `cap` is the configured
/// `backoff_cap_secs` ceiling: every table entry, including the steady
/// state for `attempt >= 5`, is clamped to it.
fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let delay = match attempt {
        0 => Duration::ZERO,
        1 => Duration::from_secs(5),
        2 => Duration::from_secs(10),
        3 => Duration::from_secs(20),
        4 => Duration::from_secs(40),
        _ => Duration::from_secs(60),
    };
    delay.min(cap)
}

/// A coherent snapshot of a [`ConnectionRecord`].
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub server_id: ServerId,
    pub connected: bool,
    pub config: LogSourceConfig,
    pub last_used: DateTime<Utc>,
}

struct ConnectionRecord {
    config: LogSourceConfig,
    connected: bool,
    last_used: DateTime<Utc>,
    reconnect_attempts: u32,
    last_reconnect_at: DateTime<Utc>,
    cancel_handle: Option<CancellationToken>,
}

/// One per connected server. Owns the record's mutex; long-running I/O
/// happens on the watcher task, never under the lock.
pub struct ConnectionSupervisor {
    server_id: ServerId,
    parent_ctx: CancellationToken,
    record: Mutex<ConnectionRecord>,
    parser_registry: Arc<ParserRegistry>,
    event_store: Arc<EventStore>,
    event_bus: Arc<dyn EventBus>,
    player_tracker: Option<Arc<dyn PlayerTracker>>,
    metrics: Arc<MetricsWindow>,
    watcher_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    backoff_cap: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        server_id: ServerId,
        parent_ctx: CancellationToken,
        config: LogSourceConfig,
        parser_registry: Arc<ParserRegistry>,
        event_store: Arc<EventStore>,
        event_bus: Arc<dyn EventBus>,
        player_tracker: Option<Arc<dyn PlayerTracker>>,
        backoff_cap: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            server_id,
            parent_ctx,
            record: Mutex::new(ConnectionRecord {
                config,
                connected: false,
                last_used: Utc::now(),
                reconnect_attempts: 0,
                last_reconnect_at: DateTime::<Utc>::default(),
                cancel_handle: None,
            }),
            parser_registry,
            event_store,
            event_bus,
            player_tracker,
            metrics: Arc::new(MetricsWindow::new()),
            watcher_handle: Mutex::new(None),
            backoff_cap,
        })
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Awaits the current watcher task's completion, if one is running.
    /// Used by the Manager's `shutdown` to bound the drain — callers should
    /// wrap this in a timeout since a blocking-transport watcher (secure-fs,
    /// plain-fs) only observes cancellation at its next poll tick.
    pub async fn join(&self) {
        let handle = self.watcher_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> Arc<MetricsWindow> {
        self.metrics.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        let record = self.record.lock();
        ConnectionStatus {
            server_id: self.server_id,
            connected: record.connected,
            config: record.config.clone(),
            last_used: record.last_used,
        }
    }

    /// Idempotent when already connected (refreshes `last_used` only — a
    /// config change does not apply to an already-connected record; that
    /// requires an explicit disconnect+connect). Otherwise applies the
    /// backoff policy and, if the delay has elapsed, attempts a fresh
    /// connection with `config`.
    pub async fn connect(self: &Arc<Self>, config: LogSourceConfig) -> Result<()> {
        {
            let mut record = self.record.lock();
            if record.connected {
                record.last_used = Utc::now();
                return Ok(());
            }
        }

        let (should_attempt, remaining) = {
            let record = self.record.lock();
            let delay = backoff_delay(record.reconnect_attempts, self.backoff_cap);
            let elapsed = (Utc::now() - record.last_reconnect_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < delay {
                (false, delay - elapsed)
            } else {
                (true, Duration::ZERO)
            }
        };

        if !should_attempt {
            return Err(GarrisonError::ReconnectDelayed { remaining });
        }

        {
            let mut record = self.record.lock();
            record.reconnect_attempts += 1;
            record.last_reconnect_at = Utc::now();
            record.config = config.clone();
        }

        let mut log_source = source::build(&config)?;
        let child_ctx = self.parent_ctx.child_token();
        let line_rx = match log_source.watch(child_ctx.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(server_id = %self.server_id, error = %e, "connection attempt failed");
                return Err(e);
            }
        };

        {
            let mut record = self.record.lock();
            record.connected = true;
            record.reconnect_attempts = 0;
            record.last_used = Utc::now();
            record.cancel_handle = Some(child_ctx.clone());
        }

        info!(server_id = %self.server_id, "connected");
        self.spawn_watcher(log_source, line_rx);
        Ok(())
    }

    /// Fails with `NotFound`-equivalent handling happens at the Manager
    /// layer (it knows whether a record exists at all); this method only
    /// handles the `AlreadyDisconnected` case and the actual teardown.
    pub fn disconnect(&self) -> Result<()> {
        let cancel_handle = {
            let mut record = self.record.lock();
            if !record.connected {
                return Err(GarrisonError::AlreadyDisconnected(self.server_id));
            }
            record.connected = false;
            record.cancel_handle.take()
        };

        if let Some(handle) = cancel_handle {
            handle.cancel();
        }
        debug!(server_id = %self.server_id, "disconnected");
        Ok(())
    }

    /// Called by the Manager's shutdown path; cancels without requiring
    /// the record to be connected (idempotent).
    pub fn force_cancel(&self) {
        let cancel_handle = {
            let mut record = self.record.lock();
            record.connected = false;
            record.cancel_handle.take()
        };
        if let Some(handle) = cancel_handle {
            handle.cancel();
        }
    }

    fn spawn_watcher(
        self: &Arc<Self>,
        mut log_source: Box<dyn LogSource>,
        mut line_rx: tokio::sync::mpsc::Receiver<crate::line::LogLine>,
    ) {
        let supervisor = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                {
                    let mut record = supervisor.record.lock();
                    record.last_used = Utc::now();
                }
                supervisor.process_line(line).await;
            }
            log_source.close().await;

            let mut record = supervisor.record.lock();
            record.connected = false;
            record.cancel_handle = None;
            debug!(server_id = %supervisor.server_id, "watcher loop ended, marked disconnected");
        });
        *self.watcher_handle.lock() = Some(handle);
    }

    async fn process_line(&self, line: crate::line::LogLine) {
        let start = std::time::Instant::now();
        let parsed = self.parser_registry.match_line(self.server_id, &line);
        let latency = start.elapsed();
        self.metrics.record_line(parsed.is_some(), Some(latency));

        let Some(event) = parsed else {
            return;
        };

        if self.event_store.admit(&event).await {
            self.event_bus.publish(event.clone());
            if let Some(tracker) = &self.player_tracker {
                tracker.on_event(&event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as StdMutex;
    use tempfile::NamedTempFile;

    use crate::store::{EventStore, InMemoryCache};

    #[derive(Default)]
    struct CollectingBus {
        events: StdMutex<Vec<ParsedEvent>>,
    }

    impl EventBus for CollectingBus {
        fn publish(&self, event: ParsedEvent) {
            self.events.lock().push(event);
        }
    }

    fn supervisor_with(config: LogSourceConfig) -> (Arc<ConnectionSupervisor>, Arc<CollectingBus>) {
        let bus = Arc::new(CollectingBus::default());
        let store = Arc::new(EventStore::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(300),
        ));
        let sup = ConnectionSupervisor::new(
            ServerId::random(),
            CancellationToken::new(),
            config,
            Arc::new(ParserRegistry::builtin()),
            store,
            bus.clone(),
            None,
            DEFAULT_BACKOFF_CAP,
        );
        (sup, bus)
    }

    #[test]
    fn backoff_table_is_non_decreasing_and_caps_at_60s() {
        let delays: Vec<Duration> = (0..8)
            .map(|attempt| backoff_delay(attempt, DEFAULT_BACKOFF_CAP))
            .collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(backoff_delay(5, DEFAULT_BACKOFF_CAP), Duration::from_secs(60));
        assert_eq!(backoff_delay(100, DEFAULT_BACKOFF_CAP), Duration::from_secs(60));
        assert_eq!(backoff_delay(0, DEFAULT_BACKOFF_CAP), Duration::ZERO);
    }

    #[test]
    fn backoff_table_clamps_every_entry_to_a_lower_configured_cap() {
        let cap = Duration::from_secs(15);
        assert_eq!(backoff_delay(2, cap), Duration::from_secs(10));
        assert_eq!(backoff_delay(3, cap), cap);
        assert_eq!(backoff_delay(5, cap), cap);
        assert_eq!(backoff_delay(100, cap), cap);
    }

    #[tokio::test]
    async fn idempotent_connect_refreshes_last_used_without_new_watcher() {
        let file = NamedTempFile::new().unwrap();
        let config = LogSourceConfig::local(file.path(), true).unwrap();
        let (sup, _bus) = supervisor_with(config.clone());

        sup.connect(config.clone()).await.unwrap();
        let first_used = sup.status().last_used;

        tokio::time::sleep(Duration::from_millis(5)).await;
        sup.connect(config).await.unwrap();
        let second_used = sup.status().last_used;

        assert!(second_used >= first_used);
        assert!(sup.status().connected);
    }

    #[tokio::test]
    async fn disconnect_on_unconnected_record_fails() {
        let file = NamedTempFile::new().unwrap();
        let config = LogSourceConfig::local(file.path(), true).unwrap();
        let (sup, _bus) = supervisor_with(config);

        let err = sup.disconnect().unwrap_err();
        assert!(matches!(err, GarrisonError::AlreadyDisconnected(_)));
    }

    #[tokio::test]
    async fn connect_then_disconnect_marks_not_connected() {
        let file = NamedTempFile::new().unwrap();
        let config = LogSourceConfig::local(file.path(), true).unwrap();
        let (sup, _bus) = supervisor_with(config.clone());

        sup.connect(config).await.unwrap();
        assert!(sup.status().connected);

        sup.disconnect().unwrap();
        assert!(!sup.status().connected);
    }

    #[tokio::test]
    async fn published_events_reach_the_bus() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "[2026.07.27-14.32.10:123] LogGame: Player 'Alice' (ID: 76561198000000001) has connected\n",
        )
        .unwrap();
        let config = LogSourceConfig::local(file.path(), true).unwrap();
        let (sup, bus) = supervisor_with(config.clone());

        sup.connect(config).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if !bus.events.lock().is_empty() || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let events = bus.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, crate::event::EventKind::PlayerConnect);
    }
}
