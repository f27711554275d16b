//! Generic circuit breaker (§4.2). Wraps any fallible async operation;
//! independent of what that operation actually calls (KV, SQL, HTTP).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{AppError, UnavailableReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Closed allows calls; `threshold` consecutive failures trips to Open.
/// Open rejects immediately until `reset_timeout` elapses, then allows one
/// probe (HalfOpen). Probe success closes the circuit; probe failure
/// reopens it with the reset timer restarted.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            threshold,
            reset_timeout,
        })
    }

    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    /// Returns `Err(AppError::Unavailable(reason))` immediately if the
    /// breaker is Open (and the reset timeout hasn't elapsed). Otherwise
    /// runs `f`, updating circuit state from the result. `reason` identifies
    /// what this breaker instance protects, so the rejection surfaces the
    /// right machine-readable code regardless of which dependency tripped it.
    pub async fn call<T, F, Fut>(&self, reason: UnavailableReason, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.maybe_transition_to_half_open(&mut inner);
            if inner.state == CircuitState::Open {
                return Err(AppError::Unavailable(reason));
            }
        }

        match f().await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                Ok(value)
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.consecutive_failures += 1;
                if inner.state == CircuitState::HalfOpen
                    || inner.consecutive_failures >= self.threshold
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
                Err(e)
            }
        }
    }
}
