//! KV/PubSub client wrapping Redis, with a Healthy/Degraded state machine
//! (§4.1). All operations go through safe wrappers that short-circuit when
//! degraded instead of hammering a dependency that is known to be down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult, UnavailableReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvState {
    Healthy,
    Degraded,
}

/// Counters backing the `kv_degraded` gauge and `kv_health_check_total`,
/// `kv_fallback_total` counters from §4.1. Kept as plain atomics rather than
/// a metrics-crate registry so the core has no ambient global state beyond
/// what's wired through `AppState` (per Design Notes: "replaced by explicit
/// typed objects wired from a composition root").
#[derive(Debug, Default)]
pub struct KvMetrics {
    pub health_check_success: std::sync::atomic::AtomicU64,
    pub health_check_failure: std::sync::atomic::AtomicU64,
    pub fallback_total: std::sync::atomic::AtomicU64,
    pub revocation_skipped: std::sync::atomic::AtomicU64,
}

/// Shared client for the KV/pub-sub store. Cheaply cloneable — all clones
/// observe the same degraded flag and share the same underlying connection.
#[derive(Clone)]
pub struct KvClient {
    manager: ConnectionManager,
    /// Raw client, used to open dedicated pub/sub connections (the
    /// multiplexed `ConnectionManager` cannot itself enter subscribe mode).
    raw_client: redis::Client,
    degraded: Arc<AtomicBool>,
    /// Serializes state transitions so a racing health-check and a racing
    /// failed operation cannot interleave into an inconsistent flag read.
    state_lock: Arc<Mutex<()>>,
    pub metrics: Arc<KvMetrics>,
    health_check_timeout: Duration,
}

impl KvClient {
    pub async fn connect(redis_url: &str, health_check_timeout: Duration) -> AppResult<Self> {
        let raw_client = redis::Client::open(redis_url).map_err(|e| {
            tracing::error!(error = ?e, "invalid redis url");
            AppError::Internal
        })?;
        let manager = raw_client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = ?e, "failed to establish redis connection manager");
            AppError::Internal
        })?;

        Ok(Self {
            manager,
            raw_client,
            degraded: Arc::new(AtomicBool::new(false)),
            state_lock: Arc::new(Mutex::new(())),
            metrics: Arc::new(KvMetrics::default()),
            health_check_timeout,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn state(&self) -> KvState {
        if self.is_degraded() {
            KvState::Degraded
        } else {
            KvState::Healthy
        }
    }

    async fn mark_degraded(&self) {
        let _guard = self.state_lock.lock().await;
        self.degraded.store(true, Ordering::Release);
    }

    async fn mark_healthy(&self) {
        let _guard = self.state_lock.lock().await;
        self.degraded.store(false, Ordering::Release);
    }

    /// One ping attempt under the configured health-check timeout.
    async fn ping_once(&self) -> bool {
        let mut conn = self.manager.clone();
        let fut = redis::cmd("PING").query_async::<_, String>(&mut conn);
        matches!(tokio::time::timeout(self.health_check_timeout, fut).await, Ok(Ok(_)))
    }

    /// Exponential-backoff health check used both by the periodic background
    /// task and by callers that want an immediate recovery probe. Up to 3
    /// attempts before declaring degraded, per §4.1.
    pub async fn health_check(&self) -> bool {
        let mut delay = Duration::from_millis(50);
        for attempt in 0..3 {
            if self.ping_once().await {
                self.metrics
                    .health_check_success
                    .fetch_add(1, Ordering::Relaxed);
                self.mark_healthy().await;
                return true;
            }
            if attempt < 2 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        self.metrics
            .health_check_failure
            .fetch_add(1, Ordering::Relaxed);
        self.mark_degraded().await;
        false
    }

    /// Spawn the background periodic health-check task (§4.1: "every 30s").
    /// Returns a handle the caller should abort on shutdown.
    pub fn spawn_periodic_health_check(self: &Self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.health_check().await;
            }
        })
    }

    fn unavailable() -> AppError {
        AppError::Unavailable(UnavailableReason::KvUnavailable)
    }

    /// Any operation failure flips the flag to Degraded immediately; the
    /// next periodic check decides recovery (§4.1 Safe wrapper contract).
    async fn on_failure(&self) {
        self.mark_degraded().await;
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(error = ?e, key, "kv get failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        match conn
            .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = ?e, key, "kv set_ex failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    pub async fn del(&self, key: &str) -> AppResult<()> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        match conn.del::<_, ()>(key).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = ?e, key, "kv del failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        match conn.exists::<_, bool>(key).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(error = ?e, key, "kv exists failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    /// Add `member` with `score` to a sorted set, trim entries older than
    /// `min_score`, and return the post-trim cardinality — the primitive the
    /// sliding-window rate limiter builds on (§4.8).
    pub async fn zadd_trim_count(
        &self,
        key: &str,
        member: &str,
        score: f64,
        min_score: f64,
        ttl: Duration,
    ) -> AppResult<u64> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<u64> = redis::pipe()
            .atomic()
            .zadd(key, member, score)
            .zrembyscore(key, 0, min_score)
            .zcard(key)
            .expire(key, ttl.as_secs().max(1) as i64)
            .query_async(&mut conn)
            .await
            .map(|(_, _, count, _): (i64, i64, u64, bool)| count);

        match result {
            Ok(count) => Ok(count),
            Err(e) => {
                tracing::warn!(error = ?e, key, "kv zadd_trim_count failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> AppResult<()> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let mut conn = self.manager.clone();
        match conn.publish::<_, _, ()>(channel, message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = ?e, channel, "kv publish failed");
                self.on_failure().await;
                Err(Self::unavailable())
            }
        }
    }

    /// Open a dedicated pub/sub connection subscribed to `channel`. Returns
    /// a stream of raw payload strings. Errors if the store is degraded —
    /// callers (the chat/signaling hubs) treat this as "skip subscription,
    /// continue local-only" per §4.5.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> AppResult<redis::aio::PubSub> {
        if self.is_degraded() {
            return Err(Self::unavailable());
        }
        let conn = match self.raw_client.get_async_pubsub().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = ?e, channel, "kv subscribe connection failed");
                self.on_failure().await;
                return Err(Self::unavailable());
            }
        };
        let mut pubsub = conn;
        if let Err(e) = pubsub.subscribe(channel).await {
            tracing::warn!(error = ?e, channel, "kv subscribe failed");
            self.on_failure().await;
            return Err(Self::unavailable());
        }
        Ok(pubsub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_reflects_degraded_flag() {
        let degraded = Arc::new(AtomicBool::new(false));
        assert_eq!(
            if degraded.load(Ordering::Acquire) {
                KvState::Degraded
            } else {
                KvState::Healthy
            },
            KvState::Healthy
        );
        degraded.store(true, Ordering::Release);
        assert_eq!(
            if degraded.load(Ordering::Acquire) {
                KvState::Degraded
            } else {
                KvState::Healthy
            },
            KvState::Degraded
        );
    }
}
