use serde::{Deserialize, Serialize};

/// Resolved, validated configuration for the log-ingestion core.
///
/// Constructed by [`crate::ConfigLoader`]; never mutated in place afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GarrisonConfig {
    /// Max number of recent fingerprints the Event Store keeps per server
    /// before the oldest are evicted (suggested default: 4096).
    #[serde(default = "default_event_store_capacity")]
    pub event_store_capacity: usize,

    /// Dedupe window, in seconds, for the Event Store's TTL-backed cache
    /// (suggested default: 300s).
    #[serde(default = "default_event_store_ttl_secs")]
    pub event_store_ttl_secs: u64,

    /// Upper bound the reconnect backoff clock saturates at (60s after
    /// attempt 5).
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Timeout applied to a single Health Prober round-trip (5s).
    #[serde(default = "default_health_probe_timeout_secs")]
    pub health_probe_timeout_secs: u64,

    /// Optional `redis://` URL for the shared key-value cache backing the
    /// Event Store. When absent, an in-process cache is used instead — fine
    /// for a single-node deployment or for tests, but it does not give
    /// cross-process dedupe.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info"` or
    /// `"garrison_core=debug,warn"`.
    #[serde(default = "default_tracing_filter")]
    pub tracing_filter: String,
}

impl Default for GarrisonConfig {
    fn default() -> Self {
        Self {
            event_store_capacity: default_event_store_capacity(),
            event_store_ttl_secs: default_event_store_ttl_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            health_probe_timeout_secs: default_health_probe_timeout_secs(),
            redis_url: None,
            tracing_filter: default_tracing_filter(),
        }
    }
}

fn default_event_store_capacity() -> usize {
    4096
}

fn default_event_store_ttl_secs() -> u64 {
    300
}

fn default_backoff_cap_secs() -> u64 {
    60
}

fn default_health_probe_timeout_secs() -> u64 {
    5
}

fn default_tracing_filter() -> String {
    "info".to_string()
}
