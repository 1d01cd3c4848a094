//! Process-wide kill-switch. Two independent monotonic flags: the
//! [`RedemptionGate`] tripped directly by redemption-path failures, and the
//! [`FailureBreaker`] tripped by a correlated count of generic errors in a
//! sliding window shared across replicas via an external store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

/// Owned by the service container rather than a bare module static: testable,
/// no hidden global state. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct RedemptionGate {
    tripped: Arc<AtomicBool>,
}

impl RedemptionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic false -> true. Never reset except by restart.
    pub fn trip(&self, reason: &str) {
        if !self.tripped.swap(true, Ordering::Release) {
            warn!(reason, "redemption gate tripped");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

/// External fast key-value counter backing the correlated-failure breaker.
/// `increment` returns the post-increment count for `key` and (re)arms its
/// TTL; `read` returns the current count without mutating it.
#[async_trait]
pub trait Breaker: Send + Sync {
    async fn increment(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<u64>;
    async fn read(&self, key: &str) -> anyhow::Result<u64>;
}

/// `redis` crate (connection-manager), the breaker's intended production
/// backing: `INCR` + `EXPIRE`, idempotent under retry, shared across
/// replicas.
pub struct RedisBreaker {
    conn: redis::aio::ConnectionManager,
}

impl RedisBreaker {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Breaker for RedisBreaker {
    async fn increment(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_seconds)
                .query_async(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn read(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(count.unwrap_or(0))
    }
}

/// In-memory backing for local development and tests; not shared across
/// replicas.
#[derive(Default)]
pub struct MemoryBreaker {
    counts: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

impl MemoryBreaker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Breaker for MemoryBreaker {
    async fn increment(&self, key: &str, _ttl_seconds: u64) -> anyhow::Result<u64> {
        let mut counts = self.counts.lock().expect("breaker mutex poisoned");
        let entry = counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn read(&self, key: &str) -> anyhow::Result<u64> {
        let counts = self.counts.lock().expect("breaker mutex poisoned");
        Ok(counts.get(key).copied().unwrap_or(0))
    }
}

/// Wraps a [`Breaker`] with the configured threshold/window and the
/// [`RedemptionGate`] it trips once the threshold is crossed.
pub struct FailureBreaker {
    breaker: Arc<dyn Breaker>,
    gate: RedemptionGate,
    threshold: u64,
    ttl_seconds: u64,
    key: String,
}

impl FailureBreaker {
    pub fn new(
        breaker: Arc<dyn Breaker>,
        gate: RedemptionGate,
        threshold: u64,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            breaker,
            gate,
            threshold,
            ttl_seconds,
            key: "grants:redeem_errors".to_string(),
        }
    }

    /// Records a generic redemption failure. Returns `true` if this call
    /// just tripped the gate.
    pub async fn record_failure(&self) -> anyhow::Result<bool> {
        let count = self.breaker.increment(&self.key, self.ttl_seconds).await?;
        if count > self.threshold {
            self.gate.trip("breaker threshold exceeded");
            return Ok(true);
        }
        Ok(false)
    }
}
