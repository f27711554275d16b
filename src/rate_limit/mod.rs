//! Sliding-window rate limiter (§4.8), backed by KV sorted sets with an
//! in-memory per-instance fallback for when KV is degraded. The fallback is
//! intentionally per-instance (not shared across the fleet) — it trades
//! precision for availability while KV recovers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::resilience::kv::KvClient;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

pub struct RateLimiter {
    kv: KvClient,
    fallback: Arc<DashMap<String, Vec<u64>>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builds the rejection error carrying the fields the `RateLimit-*`
/// response headers are populated from (§4.8).
fn rate_limited(policy: &RateLimitPolicy) -> AppError {
    AppError::RateLimited {
        limit: policy.max_requests,
        window_secs: policy.window.as_secs().max(1),
        retry_after_secs: policy.window.as_secs().max(1),
    }
}

impl RateLimiter {
    pub fn new(kv: KvClient) -> Self {
        Self {
            kv,
            fallback: Arc::new(DashMap::new()),
        }
    }

    /// Checks and records one request against `key` under `policy`. Returns
    /// `Ok(())` if admitted, `Err(AppError::RateLimited)` otherwise.
    pub async fn check(&self, key: &str, policy: RateLimitPolicy) -> Result<(), AppError> {
        if self.kv.is_degraded() {
            return self.check_fallback(key, policy);
        }

        let now = now_millis();
        let min_score = now.saturating_sub(policy.window.as_millis() as u64);
        let member = format!("{now}-{}", Uuid::new_v4());

        match self
            .kv
            .zadd_trim_count(key, &member, now as f64, min_score as f64, policy.window)
            .await
        {
            Ok(count) => {
                if count > policy.max_requests {
                    Err(rate_limited(&policy))
                } else {
                    Ok(())
                }
            }
            Err(AppError::Unavailable(_)) => self.check_fallback(key, policy),
            Err(e) => Err(e),
        }
    }

    fn check_fallback(&self, key: &str, policy: RateLimitPolicy) -> Result<(), AppError> {
        let now = now_millis();
        let min = now.saturating_sub(policy.window.as_millis() as u64);
        let mut entry = self.fallback.entry(key.to_string()).or_default();
        entry.retain(|&ts| ts >= min);
        entry.push(now);
        if entry.len() as u64 > policy.max_requests {
            Err(rate_limited(&policy))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_admits_under_limit_and_rejects_over() {
        let fallback: Arc<DashMap<String, Vec<u64>>> = Arc::new(DashMap::new());
        let policy = RateLimitPolicy {
            max_requests: 2,
            window: Duration::from_secs(60),
        };
        let key = "test-key";
        let now = now_millis();

        for _ in 0..2 {
            let mut entry = fallback.entry(key.to_string()).or_default();
            entry.push(now);
        }
        let count = fallback.get(key).map(|e| e.len()).unwrap_or(0);
        assert_eq!(count, 2);
        assert!(count as u64 <= policy.max_requests);

        let mut entry = fallback.entry(key.to_string()).or_default();
        entry.push(now);
        assert!(entry.len() as u64 > policy.max_requests);
    }

    #[test]
    fn fallback_prunes_entries_outside_window() {
        let mut series = vec![0u64, 100, 200, 100_000];
        let min = 50_000u64;
        series.retain(|&ts| ts >= min);
        assert_eq!(series, vec![100_000]);
    }
}
