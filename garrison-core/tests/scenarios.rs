//! End-to-end scenario tests driving [`Manager`] through its public API
//! only.

use std::sync::Arc;
use std::time::Duration;

use garrison_core::collab::{EventBus, NoPlayerTrackers};
use garrison_core::config::LogSourceConfig;
use garrison_core::error::GarrisonError;
use garrison_core::event::{EventKind, ParsedEvent};
use garrison_core::ids::ServerId;
use garrison_core::manager::Manager;
use garrison_core::parser::ParserRegistry;
use garrison_core::store::{EventStore, InMemoryCache};
use parking_lot::Mutex;
use tempfile::NamedTempFile;

#[derive(Default)]
struct CollectingBus {
    events: Mutex<Vec<ParsedEvent>>,
}

impl EventBus for CollectingBus {
    fn publish(&self, event: ParsedEvent) {
        self.events.lock().push(event);
    }
}

fn manager_with_bus() -> (Arc<Manager>, Arc<CollectingBus>) {
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

async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() || tokio::time::Instant::now() > deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Scenario 1: connect a local log source pointed at a file
/// that already contains a recognizable line; the event reaches the bus
/// and `status` reports connected.
#[tokio::test]
async fn local_happy_path() {
    let (manager, bus) = manager_with_bus();
    let file = NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        "[2026.07.27-14.32.10:123] LogGame: Player 'Alice' (ID: 76561198000000001) has connected\n",
    )
    .unwrap();
    let id = ServerId::random();

    manager
        .connect(id, LogSourceConfig::local(file.path(), true).unwrap())
        .await
        .unwrap();

    wait_for(|| !bus.events.lock().is_empty(), Duration::from_secs(2)).await;

    let events = bus.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::PlayerConnect);
    assert_eq!(events[0].payload["player"], "Alice");

    let status = manager.status(id).await.unwrap();
    assert!(status.connected);
}

/// Scenario 2: two lines with identical server, kind, and
/// payload dedupe to a single admitted event, regardless of how many times
/// the underlying line is observed.
#[tokio::test]
async fn dedupe_collapses_identical_events() {
    let (manager, bus) = manager_with_bus();
    let file = NamedTempFile::new().unwrap();
    let line =
        "[2026.07.27-14.32.10:123] LogGame: Player 'Alice' (ID: 76561198000000001) has connected\n";
    std::fs::write(file.path(), format!("{line}{line}")).unwrap();
    let id = ServerId::random();

    manager
        .connect(id, LogSourceConfig::local(file.path(), true).unwrap())
        .await
        .unwrap();

    // Give the watcher time to drain both lines before asserting the count
    // stays at one instead of racing the first admit.
    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for(|| !bus.events.lock().is_empty(), Duration::from_secs(2)).await;

    assert_eq!(bus.events.lock().len(), 1);
}

/// Scenario 3: a secure-fs source pointed at an unreachable
/// host fails the first `connect` call (dial/auth/stat happen
/// synchronously, see `source::secure_fs`), and a rapid second call is
/// blocked by the backoff table rather than re-dialing immediately.
#[tokio::test]
async fn reconnect_backoff_blocks_rapid_retry_after_unreachable_host() {
    let (manager, _bus) = manager_with_bus();
    let id = ServerId::random();
    let config = LogSourceConfig::secure_fs(
        "/var/log/squad.log",
        "203.0.113.1", // TEST-NET-3, reserved and unroutable
        Some(65535),
        "admin",
        "hunter2",
        None,
        false,
        garrison_core::config::PollFrequencyBounds::default(),
    )
    .unwrap();

    let first = manager.connect(id, config.clone()).await;
    assert!(first.is_err(), "unreachable host must not report success");

    let second = manager.connect(id, config).await;
    match second {
        Err(GarrisonError::ReconnectDelayed { remaining }) => {
            assert!(remaining <= Duration::from_secs(5));
        }
        other => panic!("expected ReconnectDelayed, got {other:?}"),
    }
}

/// Scenario 4: disconnecting a connected server marks it
/// disconnected without removing its record — `status` keeps reporting it,
/// and a fresh `connect` is immediately allowed (no backoff applies to a
/// deliberate disconnect).
#[tokio::test]
async fn disconnect_marks_not_connected_and_allows_reconnect() {
    let (manager, _bus) = manager_with_bus();
    let file = NamedTempFile::new().unwrap();
    let id = ServerId::random();
    let config = LogSourceConfig::local(file.path(), true).unwrap();

    manager.connect(id, config.clone()).await.unwrap();
    assert!(manager.status(id).await.unwrap().connected);

    manager.disconnect(id).await.unwrap();
    let status = manager.status(id).await.unwrap();
    assert!(!status.connected);

    assert!(matches!(
        manager.disconnect(id).await.unwrap_err(),
        GarrisonError::AlreadyDisconnected(_)
    ));

    manager.connect(id, config).await.unwrap();
    assert!(manager.status(id).await.unwrap().connected);
}

/// Scenario 5: shutdown cancels every supervisor, drains
/// within the bounded timeout, and empties the registry so every prior
/// server now reports `NotFound`.
#[tokio::test]
async fn shutdown_drains_all_supervisors_within_bound() {
    let (manager, _bus) = manager_with_bus();
    let mut ids = Vec::new();
    for _ in 0..8 {
        let file = NamedTempFile::new().unwrap();
        let id = ServerId::random();
        manager
            .connect(id, LogSourceConfig::local(file.path(), true).unwrap())
            .await
            .unwrap();
        ids.push((id, file));
    }

    let start = tokio::time::Instant::now();
    manager.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(3));

    for (id, _file) in ids {
        assert!(matches!(
            manager.status(id).await.unwrap_err(),
            GarrisonError::NotFound(_)
        ));
    }
}

/// Scenario 6 (probe isolation): probing a connected server
/// reports healthy without perturbing its record; probing a disconnected
/// server with a missing log file reports the specific failure reason.
#[tokio::test]
async fn probe_respects_isolation_and_reports_failure_reasons() {
    let (manager, _bus) = manager_with_bus();
    let file = NamedTempFile::new().unwrap();
    let connected_id = ServerId::random();
    manager
        .connect(
            connected_id,
            LogSourceConfig::local(file.path(), true).unwrap(),
        )
        .await
        .unwrap();

    let before = manager.status(connected_id).await.unwrap();
    let status = manager.probe(connected_id).await;
    assert!(status.healthy);
    let after = manager.status(connected_id).await.unwrap();
    assert_eq!(before.connected, after.connected);

    let disconnected_id = ServerId::random();
    let missing = NamedTempFile::new().unwrap();
    let missing_path = missing.path().to_path_buf();
    drop(missing);
    manager
        .connect(disconnected_id, LogSourceConfig::local(missing_path, true).unwrap())
        .await
        .unwrap();
    manager.disconnect(disconnected_id).await.unwrap();

    let status = manager.probe(disconnected_id).await;
    assert!(!status.healthy);
}
