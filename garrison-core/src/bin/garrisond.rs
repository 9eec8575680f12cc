//! `garrisond`: a thin runnable bin wrapping [`Manager`] for local
//! smoke-testing. This is not an HTTP server — the surrounding admin
//! platform that would serve one is out of scope — it exists only so the
//! crate is a runnable deliverable alongside the library.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use garrison_config::ConfigLoader;
use garrison_core::collab::{EventBus, KeyValueCache, NoPlayerTrackers, ServerCatalog, ServerCatalogRow};
use garrison_core::config::LogSourceConfig;
use garrison_core::error::Result as GarrisonResult;
use garrison_core::event::ParsedEvent;
use garrison_core::ids::ServerId;
use garrison_core::manager::Manager;
use garrison_core::parser::ParserRegistry;
use garrison_core::store::{EventStore, InMemoryCache, RedisCache};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs every admitted event instead of forwarding it anywhere further —
/// the process-wide Event Bus implementation a real deployment would wire
/// in belongs to the surrounding admin platform.
struct LoggingEventBus;

impl EventBus for LoggingEventBus {
    fn publish(&self, event: ParsedEvent) {
        info!(
            server_id = %event.server_id,
            kind = %event.kind,
            parser_id = %event.parser_id,
            "event published"
        );
    }
}

/// A fixed, in-memory [`ServerCatalog`] for local smoke-testing: the real
/// catalog lives in the admin platform's database, out of scope here.
/// Reads at most one demo row from `GARRISON_DEMO_LOG_PATH`.
struct StaticServerCatalog {
    rows: Vec<ServerCatalogRow>,
}

#[async_trait]
impl ServerCatalog for StaticServerCatalog {
    async fn list_log_configured_servers(&self) -> GarrisonResult<Vec<ServerCatalogRow>> {
        Ok(self.rows.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.tracing_filter.clone()))
        .init();

    info!(?config, "garrisond starting");

    let cache: Arc<dyn KeyValueCache> = match &config.redis_url {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => Arc::new(InMemoryCache::with_capacity(config.event_store_capacity)),
    };
    let event_store = Arc::new(EventStore::new(
        cache,
        Duration::from_secs(config.event_store_ttl_secs),
    ));

    let manager = Manager::new(
        Arc::new(ParserRegistry::builtin()),
        event_store,
        Arc::new(LoggingEventBus),
        Arc::new(NoPlayerTrackers),
        Duration::from_secs(config.health_probe_timeout_secs),
        Duration::from_secs(config.backoff_cap_secs),
    );

    let catalog = StaticServerCatalog {
        rows: demo_catalog_rows(),
    };
    let outcome = manager.connect_all(&catalog).await?;
    info!(
        attempted = outcome.attempted,
        succeeded = outcome.succeeded,
        failed = outcome.failed.len(),
        "connect_all complete"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining");
    manager.shutdown().await;

    Ok(())
}

/// Reads `GARRISON_DEMO_LOG_PATH` for a single demo server to watch; absent
/// or invalid means an empty catalog, and the process simply idles until
/// Ctrl-C.
fn demo_catalog_rows() -> Vec<ServerCatalogRow> {
    let Ok(path) = std::env::var("GARRISON_DEMO_LOG_PATH") else {
        warn!("GARRISON_DEMO_LOG_PATH unset, connecting no servers");
        return Vec::new();
    };

    match LogSourceConfig::local(&path, false) {
        Ok(config) => vec![ServerCatalogRow {
            server_id: ServerId::random(),
            config,
        }],
        Err(e) => {
            warn!(path, error = %e, "invalid GARRISON_DEMO_LOG_PATH, connecting no servers");
            Vec::new()
        }
    }
}
