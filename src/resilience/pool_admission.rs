//! Connection-pool admission middleware (§4.9). Rejects new requests with
//! `POOL_EXHAUSTED` before they queue for a database connection, rather than
//! letting them pile up behind an already-saturated pool.

use axum::{extract::State, http::Request, middleware::Next, response::Response};
use sqlx::PgPool;

use crate::db::pool_stats;
use crate::error::{AppError, UnavailableReason};

#[derive(Clone, Copy)]
pub struct PoolAdmissionConfig {
    pub threshold: f64,
}

pub async fn pool_admission(
    State(pool): State<PgPool>,
    State(config): State<PoolAdmissionConfig>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let stats = pool_stats(&pool);
    if stats.utilization() >= config.threshold {
        tracing::warn!(
            in_use = stats.in_use,
            max = stats.max,
            "rejecting request: pool admission threshold exceeded"
        );
        return Err(AppError::Unavailable(UnavailableReason::PoolExhausted));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolStats;

    #[test]
    fn threshold_comparison_rejects_at_or_above() {
        let stats = PoolStats {
            in_use: 16,
            max: 20,
        };
        let config = PoolAdmissionConfig { threshold: 0.8 };
        assert!(stats.utilization() >= config.threshold);
    }

    #[test]
    fn threshold_comparison_admits_below() {
        let stats = PoolStats {
            in_use: 10,
            max: 20,
        };
        let config = PoolAdmissionConfig { threshold: 0.8 };
        assert!(stats.utilization() < config.threshold);
    }
}
