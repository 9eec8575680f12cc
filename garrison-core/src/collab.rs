//! External interfaces: the collaborators this crate consumes but does not
//! own. Each is a trait so the crate carries no concrete dependency on the
//! surrounding admin platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::LogSourceConfig;
use crate::event::ParsedEvent;
use crate::ids::ServerId;

/// Fan-out sink for admitted events. `publish` is non-blocking per
/// subscriber: slow subscribers lose events, not the pipeline.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: ParsedEvent);
}

/// Per-server player state, updated on every admitted event. The core
/// tolerates a server with no registered tracker.
#[async_trait]
pub trait PlayerTracker: Send + Sync {
    async fn on_event(&self, event: &ParsedEvent);
}

/// `get(server_id) → tracker_handle?`. The Manager looks a server's
/// tracker up through this registry once, at connect time, and hands the
/// `Arc` to the Supervisor — an injected handle, not a back-pointer, so
/// the Supervisor never holds a reference back to the Manager itself.
pub trait PlayerTrackerRegistry: Send + Sync {
    fn get(&self, server_id: ServerId) -> Option<Arc<dyn PlayerTracker>>;
}

/// A [`PlayerTrackerRegistry`] with no trackers registered for any server,
/// for deployments (and tests) that don't run a player tracker.
#[derive(Default)]
pub struct NoPlayerTrackers;

impl PlayerTrackerRegistry for NoPlayerTrackers {
    fn get(&self, _server_id: ServerId) -> Option<Arc<dyn PlayerTracker>> {
        None
    }
}

/// Atomic check-and-insert cache backing the Event Store. Implementations:
/// [`crate::store::InMemoryCache`] (default) and [`crate::store::RedisCache`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Returns `true` if `key` was absent and has now been set; `false`
    /// if it was already present. Must be atomic per key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> crate::error::Result<bool>;

    async fn delete(&self, key: &str) -> crate::error::Result<()>;
}

/// A single row the Server Catalog reports for a server with log
/// ingestion configured. Rows with a null source type or blank file path
/// are skipped by the caller before conversion to [`LogSourceConfig`] —
/// see [`ServerCatalog::list_log_configured_servers`].
#[derive(Debug, Clone)]
pub struct ServerCatalogRow {
    pub server_id: ServerId,
    pub config: LogSourceConfig,
}

/// The federated list of servers and their transport configuration,
/// queried once by `Manager::connect_all`.
#[async_trait]
pub trait ServerCatalog: Send + Sync {
    async fn list_log_configured_servers(&self) -> crate::error::Result<Vec<ServerCatalogRow>>;
}

/// The Health Prober's output, shaped to match the status endpoint's JSON
/// contract verbatim: `{enabled, sourceType?, healthy, reason?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTransportStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ProbeFailureReason>,
}

impl LogTransportStatus {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            source_type: None,
            healthy: false,
            reason: Some(ProbeFailureReason::NotConfigured),
        }
    }
}

/// Normalized probe failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailureReason {
    PermissionDenied,
    AuthenticationFailed,
    LogFileNotFound,
    Timeout,
    ConnectionFailed,
    ProbeFailed,
    MissingCredentials,
    LogPathIsDirectory,
    UnsupportedSourceType,
    NotConfigured,
    ProbeNotRequested,
    LogwatcherDisconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pins `LogTransportStatus`'s wire shape to spec.md §6's
    /// `{enabled, sourceType?, healthy, reason?}` contract: camelCase
    /// fields, optional fields omitted (not null) when absent.
    #[test]
    fn log_transport_status_serializes_to_the_spec_shape() {
        let healthy = LogTransportStatus {
            enabled: true,
            source_type: Some("local".to_string()),
            healthy: true,
            reason: None,
        };
        let value = serde_json::to_value(&healthy).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "enabled": true,
                "sourceType": "local",
                "healthy": true,
            })
        );

        let disabled = LogTransportStatus::disabled();
        let value = serde_json::to_value(&disabled).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "enabled": false,
                "healthy": false,
                "reason": "not_configured",
            })
        );
    }
}
