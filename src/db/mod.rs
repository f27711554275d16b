use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub async fn create_pool(config: &Config) -> AppResult<PgPool> {
    info!("connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "failed to connect to database");
            AppError::Internal
        })?;

    info!("database connection pool created");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(AppError::from)
}

/// Snapshot of pool utilization, used by the connection-pool admission
/// middleware (§4.9) to gate queries before they even attempt to acquire.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub in_use: u32,
    pub max: u32,
}

impl PoolStats {
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max as f64
        }
    }
}

pub fn pool_stats(pool: &PgPool) -> PoolStats {
    let max = pool.options().get_max_connections();
    let in_use = pool.size().saturating_sub(pool.num_idle() as u32);
    PoolStats { in_use, max }
}

/// Acquire a connection with a bounded timeout, classifying timeout as
/// `AppError::Unavailable(DbAcquireTimeout)` rather than letting a raw sqlx
/// timeout error leak to callers.
pub async fn acquire_with_timeout(
    pool: &PgPool,
    timeout: Duration,
) -> AppResult<sqlx::pool::PoolConnection<sqlx::Postgres>> {
    match tokio::time::timeout(timeout, pool.acquire()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => {
            tracing::error!(error = ?e, "failed to acquire db connection");
            Err(AppError::Internal)
        }
        Err(_) => Err(AppError::Unavailable(
            crate::error::UnavailableReason::DbAcquireTimeout,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_stats_utilization_computes_fraction() {
        let stats = PoolStats {
            in_use: 16,
            max: 20,
        };
        assert!((stats.utilization() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn pool_stats_utilization_zero_max_is_zero() {
        let stats = PoolStats { in_use: 0, max: 0 };
        assert_eq!(stats.utilization(), 0.0);
    }
}
