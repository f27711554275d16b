//! Session and revocation store (§4.4). Refresh-token sessions are
//! persisted relationally (survive a KV outage); the access-token
//! blacklist and failed-login counters live in KV for fast reads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult, UnavailableReason};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::kv::KvClient;
use crate::resilience::retry::RetryPolicy;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Persists refresh-token sessions in Postgres and maintains a KV-backed
/// access-token blacklist for fast-path revocation checks. When KV is
/// degraded, revocation checks fail open (§7 fail-open table) and the event
/// is counted via `KvMetrics::revocation_skipped`.
#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
    kv: KvClient,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl SessionStore {
    pub fn new(pool: PgPool, kv: KvClient, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { pool, kv, breaker, retry }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        refresh_token_hash: &str,
        ttl: chrono::Duration,
    ) -> AppResult<Session> {
        let now = Utc::now();
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token_hash, created_at, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, NULL)
            RETURNING id, user_id, refresh_token_hash, created_at, expires_at, revoked_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(refresh_token_hash)
        .bind(now)
        .bind(now + ttl)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn find_by_hash(&self, refresh_token_hash: &str) -> AppResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"SELECT id, user_id, refresh_token_hash, created_at, expires_at, revoked_at
               FROM sessions WHERE refresh_token_hash = $1"#,
        )
        .bind(refresh_token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn revoke(&self, session_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET revoked_at = $1 WHERE user_id = $2 AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn blacklist_key(token_id: &str) -> String {
        format!("blacklist:{token_id}")
    }

    /// Blacklist an access token by its `jti` until it would have expired
    /// naturally — no point retaining the entry past that point.
    pub async fn blacklist_access_token(&self, token_id: &str, ttl: std::time::Duration) -> AppResult<()> {
        self.kv
            .set_ex(&Self::blacklist_key(token_id), "1", ttl)
            .await
    }

    /// Fail-open: if KV is degraded, treat the token as not-revoked rather
    /// than rejecting every request while KV recovers (§7). Routed through
    /// the generic breaker + retry so a transient KV blip is retried before
    /// falling back, on top of `KvClient`'s own degraded-state tracking.
    pub async fn is_access_token_revoked(&self, token_id: &str) -> bool {
        let key = Self::blacklist_key(token_id);
        let kv = self.kv.clone();
        let retry = self.retry;

        let result = self
            .breaker
            .call(UnavailableReason::KvUnavailable, || {
                let kv = kv.clone();
                let key = key.clone();
                async move {
                    retry
                        .run(
                            None,
                            |e| matches!(e, AppError::Unavailable(_)),
                            || {
                                let kv = kv.clone();
                                let key = key.clone();
                                async move { kv.exists(&key).await }
                            },
                        )
                        .await
                }
            })
            .await;

        match result {
            Ok(revoked) => revoked,
            Err(AppError::Unavailable(_)) => {
                self.kv
                    .metrics
                    .revocation_skipped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!("kv degraded: revocation check skipped (fail-open)");
                false
            }
            Err(_) => false,
        }
    }

    /// Keyed by IP+email (§4.3) so a single attacker IP can't lock out an
    /// arbitrary victim email, and a single leaked email can't be locked out
    /// from behind an unrelated IP.
    fn lockout_key(ip: &str, email: &str) -> String {
        format!("lockout:failcount:{ip}:{email}")
    }

    fn lockout_until_key(ip: &str, email: &str) -> String {
        format!("lockout:until:{ip}:{email}")
    }

    /// Returns `Some(seconds_remaining)` if the account is currently locked.
    pub async fn lockout_remaining(&self, ip: &str, email: &str) -> Option<i64> {
        match self.kv.get(&Self::lockout_until_key(ip, email)).await {
            Ok(Some(raw)) => {
                let until: DateTime<Utc> = raw.parse().ok()?;
                let remaining = (until - Utc::now()).num_seconds();
                if remaining > 0 {
                    Some(remaining)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Records a failed login attempt. Once `threshold` failures occur
    /// within `window`, locks the account for `lockout_duration`. Fails open
    /// (no lockout recorded) when KV is degraded, consistent with §7's
    /// treatment of best-effort abuse controls.
    pub async fn record_failed_login(
        &self,
        ip: &str,
        email: &str,
        threshold: u32,
        window: std::time::Duration,
        lockout_duration: std::time::Duration,
    ) {
        let key = Self::lockout_key(ip, email);
        let count = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw.parse::<u32>().unwrap_or(0) + 1,
            _ => 1,
        };
        if self.kv.set_ex(&key, &count.to_string(), window).await.is_err() {
            return;
        }
        if count >= threshold {
            let until = Utc::now() + chrono::Duration::from_std(lockout_duration).unwrap_or_else(|_| chrono::Duration::zero());
            let _ = self
                .kv
                .set_ex(&Self::lockout_until_key(ip, email), &until.to_rfc3339(), lockout_duration)
                .await;
        }
    }

    pub async fn clear_failed_logins(&self, ip: &str, email: &str) {
        let _ = self.kv.del(&Self::lockout_key(ip, email)).await;
        let _ = self.kv.del(&Self::lockout_until_key(ip, email)).await;
    }
}
