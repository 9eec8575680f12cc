//! Manager (C6): the multi-tenant registry of [`ConnectionSupervisor`]s.
//!
//! A single process-wide instance, passed explicitly to collaborators
//! rather than looked up from ambient state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collab::{EventBus, LogTransportStatus, PlayerTrackerRegistry, ServerCatalog};
use crate::config::LogSourceConfig;
use crate::error::{GarrisonError, Result};
use crate::ids::ServerId;
use crate::metrics::{self, AggregateMetrics, MetricsSnapshot};
use crate::parser::ParserRegistry;
use crate::prober::HealthProber;
use crate::store::EventStore;
use crate::supervisor::{ConnectionStatus, ConnectionSupervisor};

/// How long [`Manager::shutdown`] waits for each supervisor's watcher to
/// finish before giving up on it.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Aggregate counts and metrics returned by [`Manager::stats`].
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub by_source_type: HashMap<crate::config::SourceKind, usize>,
    pub per_server_metrics: HashMap<ServerId, MetricsSnapshot>,
    pub aggregate_metrics: AggregateMetrics,
}

/// Outcome of one `connect` attempt inside [`Manager::connect_all`].
#[derive(Debug)]
pub struct ConnectAllOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<(ServerId, GarrisonError)>,
}

/// Thread-safe registry of per-server [`ConnectionSupervisor`]s. A single
/// `RwLock` guards the map; each record's own mutex guards its mutable
/// fields. Locking discipline: registry lock, then record lock, never the
/// reverse, and never held across I/O or an Event Bus send.
pub struct Manager {
    root_ctx: CancellationToken,
    supervisors: RwLock<HashMap<ServerId, Arc<ConnectionSupervisor>>>,
    parser_registry: Arc<ParserRegistry>,
    event_store: Arc<EventStore>,
    event_bus: Arc<dyn EventBus>,
    player_trackers: Arc<dyn PlayerTrackerRegistry>,
    prober: HealthProber,
    backoff_cap: Duration,
}

impl Manager {
    pub fn new(
        parser_registry: Arc<ParserRegistry>,
        event_store: Arc<EventStore>,
        event_bus: Arc<dyn EventBus>,
        player_trackers: Arc<dyn PlayerTrackerRegistry>,
        health_probe_timeout: Duration,
        backoff_cap: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            root_ctx: CancellationToken::new(),
            supervisors: RwLock::new(HashMap::new()),
            parser_registry,
            event_store,
            event_bus,
            player_trackers,
            prober: HealthProber::new(health_probe_timeout),
            backoff_cap,
        })
    }

    /// Idempotent when `id` is already connected (refreshes `last_used` via
    /// the Supervisor's own idempotent `connect`); creates a new Supervisor
    /// or drives a reconnect through the backoff policy otherwise.
    pub async fn connect(&self, id: ServerId, config: LogSourceConfig) -> Result<()> {
        let existing = self.supervisors.read().await.get(&id).cloned();
        if let Some(existing) = existing {
            return existing.connect(config).await;
        }

        let tracker = self.player_trackers.get(id);
        let supervisor = ConnectionSupervisor::new(
            id,
            self.root_ctx.child_token(),
            config.clone(),
            self.parser_registry.clone(),
            self.event_store.clone(),
            self.event_bus.clone(),
            tracker,
            self.backoff_cap,
        );

        // Register before attempting the first connect. A brand-new
        // Supervisor's own `reconnect_attempts` counter is what the backoff
        // table reads on every later `connect` call for this `id` —
        // registering only on success would mean a failed first dial has
        // nowhere to persist that counter, and the very next call would
        // build an entirely fresh Supervisor with the counter back at zero,
        // making the backoff window unobservable for a server that has
        // never once connected.
        //
        // The write lock is held only long enough to re-check-and-insert:
        // two concurrent first-time `connect`s for the same `id` would
        // otherwise both pass the read-lock check above, both build their
        // own Supervisor, and the second `insert` would silently orphan the
        // first — leaving its caller driving a watcher the registry no
        // longer points to. Re-checking under the write lock makes the
        // whole check-and-insert atomic, so only one Supervisor per `id`
        // is ever actually connected.
        let supervisor = {
            let mut supervisors = self.supervisors.write().await;
            match supervisors.get(&id).cloned() {
                Some(winner) => winner,
                None => {
                    supervisors.insert(id, supervisor.clone());
                    supervisor
                }
            }
        };

        supervisor.connect(config).await
    }

    /// Fails with `NotFound` if `id` has never been connected; otherwise
    /// delegates to the Supervisor, which fails with `AlreadyDisconnected`
    /// if it is not currently connected. The record is kept (not removed)
    /// so a later `status(id)` still observes it as disconnected — only
    /// `shutdown()` clears the registry.
    pub async fn disconnect(&self, id: ServerId) -> Result<()> {
        let supervisor = self
            .supervisors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(GarrisonError::NotFound(id))?;
        supervisor.disconnect()
    }

    /// Iterates every server the catalog reports as log-configured, calling
    /// `connect` for each; individual failures are logged and do not stop
    /// the sweep.
    pub async fn connect_all(&self, catalog: &dyn ServerCatalog) -> Result<ConnectAllOutcome> {
        let rows = catalog.list_log_configured_servers().await?;
        let mut outcome = ConnectAllOutcome {
            attempted: rows.len(),
            succeeded: 0,
            failed: Vec::new(),
        };

        for row in rows {
            match self.connect(row.server_id, row.config).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    warn!(server_id = %row.server_id, error = %e, "connect_all: connect failed for server");
                    outcome.failed.push((row.server_id, e));
                }
            }
        }

        Ok(outcome)
    }

    /// Snapshot read of one server's connection record.
    pub async fn status(&self, id: ServerId) -> Result<ConnectionStatus> {
        self.supervisors
            .read()
            .await
            .get(&id)
            .map(|s| s.status())
            .ok_or(GarrisonError::NotFound(id))
    }

    /// Aggregate counts and metrics across every registered server.
    pub async fn stats(&self) -> ManagerStats {
        let supervisors = self.supervisors.read().await;

        let mut connected = 0;
        let mut by_source_type: HashMap<crate::config::SourceKind, usize> = HashMap::new();
        let mut per_server_metrics = HashMap::new();
        let mut snapshots = Vec::with_capacity(supervisors.len());

        for (id, supervisor) in supervisors.iter() {
            let status = supervisor.status();
            if status.connected {
                connected += 1;
            }
            *by_source_type.entry(status.config.kind()).or_insert(0) += 1;

            let snapshot = supervisor.metrics().snapshot();
            per_server_metrics.insert(*id, snapshot);
            snapshots.push(snapshot);
        }

        let total = supervisors.len();
        ManagerStats {
            total,
            connected,
            disconnected: total - connected,
            by_source_type,
            per_server_metrics,
            aggregate_metrics: metrics::aggregate(&snapshots),
        }
    }

    /// Runs the Health Prober against `id`'s configured transport without
    /// disturbing its live Supervisor state. A currently-connected server is
    /// reported healthy from its own liveness rather than by dialing a
    /// second, competing session.
    pub async fn probe(&self, id: ServerId) -> LogTransportStatus {
        let Some(supervisor) = self.supervisors.read().await.get(&id).cloned() else {
            return LogTransportStatus::disabled();
        };

        let status = supervisor.status();
        if status.connected {
            return LogTransportStatus {
                enabled: true,
                source_type: Some(status.config.kind().to_string()),
                healthy: true,
                reason: None,
            };
        }

        self.prober.probe(&status.config).await
    }

    /// Cancels the root context, waits (bounded) for every Supervisor's
    /// watcher to finish, and empties the registry. Idempotent: calling it
    /// twice is a no-op the second time since the registry is already
    /// empty.
    pub async fn shutdown(&self) {
        self.root_ctx.cancel();

        let supervisors: Vec<Arc<ConnectionSupervisor>> = {
            let mut guard = self.supervisors.write().await;
            guard.drain().map(|(_, s)| s).collect()
        };

        for supervisor in &supervisors {
            supervisor.force_cancel();
        }

        for supervisor in supervisors {
            let server_id = supervisor.server_id();
            if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, supervisor.join())
                .await
                .is_err()
            {
                error!(server_id = %server_id, "supervisor watcher did not drain within the shutdown timeout");
            }
        }

        info!("manager shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as StdMutex;
    use tempfile::NamedTempFile;

    use crate::collab::NoPlayerTrackers;
    use crate::event::ParsedEvent;
    use crate::store::InMemoryCache;

    #[derive(Default)]
    struct CollectingBus {
        events: StdMutex<Vec<ParsedEvent>>,
    }

    impl EventBus for CollectingBus {
        fn publish(&self, event: ParsedEvent) {
            self.events.lock().push(event);
        }
    }

    fn test_manager() -> (Arc<Manager>, Arc<CollectingBus>) {
        let bus = Arc::new(CollectingBus::default());
        let store = Arc::new(EventStore::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(300),
        ));
        let manager = Manager::new(
            Arc::new(ParserRegistry::builtin()),
            store,
            bus.clone(),
            Arc::new(NoPlayerTrackers),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        (manager, bus)
    }

    #[tokio::test]
    async fn connect_then_status_then_disconnect() {
        let (manager, _bus) = test_manager();
        let file = NamedTempFile::new().unwrap();
        let id = ServerId::random();
        let config = LogSourceConfig::local(file.path(), true).unwrap();

        manager.connect(id, config).await.unwrap();
        assert!(manager.status(id).await.unwrap().connected);

        manager.disconnect(id).await.unwrap();
        assert!(!manager.status(id).await.unwrap().connected);
    }

    #[tokio::test]
    async fn disconnect_unknown_server_is_not_found() {
        let (manager, _bus) = test_manager();
        let err = manager.disconnect(ServerId::random()).await.unwrap_err();
        assert!(matches!(err, GarrisonError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_unknown_server_is_not_found() {
        let (manager, _bus) = test_manager();
        let err = manager.status(ServerId::random()).await.unwrap_err();
        assert!(matches!(err, GarrisonError::NotFound(_)));
    }

    #[tokio::test]
    async fn stats_counts_connected_and_disconnected() {
        let (manager, _bus) = test_manager();
        let file_a = NamedTempFile::new().unwrap();
        let file_b = NamedTempFile::new().unwrap();
        let id_a = ServerId::random();
        let id_b = ServerId::random();

        manager
            .connect(id_a, LogSourceConfig::local(file_a.path(), true).unwrap())
            .await
            .unwrap();
        manager
            .connect(id_b, LogSourceConfig::local(file_b.path(), true).unwrap())
            .await
            .unwrap();
        manager.disconnect(id_b).await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.disconnected, 1);
    }

    #[tokio::test]
    async fn shutdown_clears_registry_and_is_idempotent() {
        let (manager, _bus) = test_manager();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let file = NamedTempFile::new().unwrap();
            let id = ServerId::random();
            manager
                .connect(id, LogSourceConfig::local(file.path(), true).unwrap())
                .await
                .unwrap();
            ids.push((id, file));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        manager.shutdown().await;
        assert!(tokio::time::Instant::now() < deadline);

        for (id, _file) in ids {
            assert!(matches!(
                manager.status(id).await.unwrap_err(),
                GarrisonError::NotFound(_)
            ));
        }

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn probe_does_not_change_connected_state() {
        let (manager, _bus) = test_manager();
        let file = NamedTempFile::new().unwrap();
        let id = ServerId::random();
        manager
            .connect(id, LogSourceConfig::local(file.path(), true).unwrap())
            .await
            .unwrap();

        let before = manager.status(id).await.unwrap();
        let _ = manager.probe(id).await;
        let after = manager.status(id).await.unwrap();

        assert_eq!(before.connected, after.connected);
    }
}
