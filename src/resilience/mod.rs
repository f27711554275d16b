//! Resilience layer: KV health/degraded state machine, circuit breaker,
//! retry, connection-pool admission, and request deadlines (§4.1, §4.2,
//! §4.9, §4.10).

pub mod circuit_breaker;
pub mod kv;
pub mod pool_admission;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use kv::{KvClient, KvMetrics, KvState};
pub use retry::RetryPolicy;

use std::time::Duration;

/// Bundle of per-dependency resilience primitives, constructed once at
/// startup from `Config` and wired into `AppState`.
pub struct ResilienceConfig {
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ResilienceConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            circuit_breaker_reset_timeout: config.circuit_breaker_reset_timeout,
            retry_policy: RetryPolicy::new(
                config.retry_max_attempts,
                config.retry_base_delay,
                config.retry_max_delay,
            ),
        }
    }

    pub fn new_breaker(&self) -> std::sync::Arc<CircuitBreaker> {
        CircuitBreaker::new(self.circuit_breaker_threshold, self.circuit_breaker_reset_timeout)
    }
}
