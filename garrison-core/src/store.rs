//! Event Store (C3): fingerprint-based deduplication against a shared
//! key-value cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::collab::KeyValueCache;
use crate::error::{GarrisonError, Result};
use crate::event::ParsedEvent;

/// Default suggested window: N = 4096 events, T = 300s. `EventStore` itself
/// only needs T; N is advisory capacity guidance for whichever
/// [`KeyValueCache`] backs it.
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(300);

/// Deduplicates [`ParsedEvent`]s per `server_id` via an atomic
/// check-and-insert against a [`KeyValueCache`]. Cache unavailability fails
/// open: the event is treated as new so the pipeline never halts because
/// dedupe is unavailable.
pub struct EventStore {
    cache: Arc<dyn KeyValueCache>,
    ttl: Duration,
}

impl EventStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// `true` if `event`'s fingerprint was not already present within the
    /// dedupe window (the event is new); `false` otherwise. Concurrent
    /// admits on the same fingerprint resolve with exactly one `true`,
    /// since the underlying cache's `set_if_absent` is atomic.
    pub async fn admit(&self, event: &ParsedEvent) -> bool {
        let fingerprint = event.fingerprint();
        let key = dedupe_key(event.server_id, fingerprint);

        match self.cache.set_if_absent(&key, "1", self.ttl).await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, key, "event store cache unavailable, failing open");
                true
            }
        }
    }
}

fn dedupe_key(server_id: crate::ids::ServerId, fingerprint: crate::event::EventFingerprint) -> String {
    format!("garrison:dedupe:{server_id}:{fingerprint}")
}

/// In-memory [`KeyValueCache`], the default backend: used by the
/// bootstrap bin and by tests that don't need a real Redis instance.
///
/// `capacity` bounds the number of live fingerprints per process (spec.md
/// §4.3's suggested N = 4096); `None` leaves it unbounded, which is fine for
/// tests but not for a long-running deployment with no Redis configured.
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
    capacity: Option<usize>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: Some(capacity),
        }
    }

    /// Evicts the entry with the earliest expiry once the map has grown
    /// past `capacity`. Approximate (not a true LRU), but bounds memory for
    /// an in-process cache that otherwise only reclaims space lazily, on
    /// the next access to an already-expired key.
    fn evict_if_over_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.entries.len() <= capacity {
            return;
        }
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().1)
            .map(|entry| entry.key().clone())
        {
            self.entries.remove(&oldest);
        }
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut admitted = false;

        self.entries
            .entry(key.to_string())
            .and_modify(|(existing_value, expires)| {
                if *expires <= now {
                    *existing_value = value.to_string();
                    *expires = expires_at;
                    admitted = true;
                }
            })
            .or_insert_with(|| {
                admitted = true;
                (value.to_string(), expires_at)
            });

        if admitted {
            self.evict_if_over_capacity();
        }

        Ok(admitted)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Redis-backed [`KeyValueCache`] built on `ConnectionManager` and
/// `SET NX EX`/`DEL`, exposing an atomic `set_if_absent` rather than plain
/// get/set.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        debug!(redis_url, "connecting event store redis cache");
        let client = redis::Client::open(redis_url)
            .map_err(|e| GarrisonError::TransportFailed(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GarrisonError::TransportFailed(format!("redis connect failed: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| GarrisonError::TransportFailed(format!("redis SET NX EX failed: {e}")))?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| GarrisonError::TransportFailed(format!("redis DEL failed: {e}")))?;
        Ok(())
    }
}
