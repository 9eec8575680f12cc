//! Environment-variable overlay, applied on top of file/default config.
//!
//! Mirrors the gather-every-var-into-an-Option-struct shape used for
//! `EnvConfig` elsewhere in this stack: every var is optional, and absence
//! means "defer to the layer below".

#[derive(Debug, Default, Clone)]
pub struct EnvOverlay {
    pub event_store_capacity: Option<usize>,
    pub event_store_ttl_secs: Option<u64>,
    pub backoff_cap_secs: Option<u64>,
    pub health_probe_timeout_secs: Option<u64>,
    pub redis_url: Option<String>,
    pub tracing_filter: Option<String>,
}

impl EnvOverlay {
    pub fn gather() -> Self {
        Self {
            event_store_capacity: parse_var("GARRISON_EVENT_STORE_CAPACITY"),
            event_store_ttl_secs: parse_var("GARRISON_EVENT_STORE_TTL_SECS"),
            backoff_cap_secs: parse_var("GARRISON_BACKOFF_CAP_SECS"),
            health_probe_timeout_secs: parse_var("GARRISON_HEALTH_PROBE_TIMEOUT_SECS"),
            redis_url: std::env::var("GARRISON_REDIS_URL").ok(),
            tracing_filter: std::env::var("GARRISON_LOG").ok(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}
