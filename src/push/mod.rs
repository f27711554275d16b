//! Push dispatcher (§4.11). `PushProvider` is a capability trait so the
//! live HTTP-backed provider and the in-memory test double are selected at
//! composition time in `AppState`, rather than branching on a runtime mode
//! flag inside call sites.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, UnavailableReason};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The provider reports the device token no longer exists; the caller
    /// should reap it from `push_tokens` (§3 Push Token, §4.11).
    InvalidToken,
    TransientFailure,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, device_token: &str, notification: &PushNotification) -> PushOutcome;
}

fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        "*".repeat(token.len())
    } else {
        format!("{}…{}", &token[..8], &token[token.len() - 8..])
    }
}

/// HTTP-backed provider hitting a push gateway endpoint (APNs/FCM relay).
/// Never logs the raw device token — only the masked form — matching the
/// no-secrets-in-logs convention used for JWTs/session identifiers.
pub struct LivePushProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl LivePushProvider {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl PushProvider for LivePushProvider {
    async fn send(&self, device_token: &str, notification: &PushNotification) -> PushOutcome {
        let payload = serde_json::json!({
            "token": device_token,
            "title": notification.title,
            "body": notification.body,
            "data": notification.data,
        });

        match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => PushOutcome::Delivered,
            Ok(resp) if resp.status() == reqwest::StatusCode::GONE => {
                tracing::info!(token = %mask_token(device_token), "push token invalid, will reap");
                PushOutcome::InvalidToken
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), token = %mask_token(device_token), "push send failed");
                PushOutcome::TransientFailure
            }
            Err(e) => {
                tracing::warn!(error = ?e, token = %mask_token(device_token), "push send error");
                PushOutcome::TransientFailure
            }
        }
    }
}

/// Records every send in memory; used by integration tests to assert a
/// missed-call notification was dispatched without a real push gateway.
pub struct TestPushProvider {
    pub sent: Mutex<Vec<(String, PushNotification)>>,
}

impl TestPushProvider {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Default for TestPushProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushProvider for TestPushProvider {
    async fn send(&self, device_token: &str, notification: &PushNotification) -> PushOutcome {
        self.sent
            .lock()
            .await
            .push((device_token.to_string(), notification.clone()));
        PushOutcome::Delivered
    }
}

/// Identifies a user's registered device tokens for a missed-call or
/// message notification fan-out (§3 Push Token, §4.7 missed-call flow).
/// Every send is routed through the circuit breaker and retry policy
/// (§4.2) — a flaky push gateway must not be hammered on every call event.
pub struct PushDispatcher {
    provider: Arc<dyn PushProvider>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl PushDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { provider, breaker, retry }
    }

    async fn send_resilient(&self, device_token: &str, notification: &PushNotification) -> PushOutcome {
        let provider = self.provider.clone();
        let token = device_token.to_string();
        let notification = notification.clone();
        let retry = self.retry;

        let result = self
            .breaker
            .call(UnavailableReason::PushUnavailable, || {
                let provider = provider.clone();
                let token = token.clone();
                let notification = notification.clone();
                async move {
                    retry
                        .run(
                            None,
                            |e| matches!(e, AppError::Unavailable(_)),
                            || {
                                let provider = provider.clone();
                                let token = token.clone();
                                let notification = notification.clone();
                                async move {
                                    match provider.send(&token, &notification).await {
                                        PushOutcome::TransientFailure => {
                                            Err(AppError::Unavailable(UnavailableReason::PushUnavailable))
                                        }
                                        other => Ok(other),
                                    }
                                }
                            },
                        )
                        .await
                }
            })
            .await;

        result.unwrap_or(PushOutcome::TransientFailure)
    }

    pub async fn notify_missed_call(&self, device_token: &str, caller_name: &str, call_id: Uuid) -> PushOutcome {
        let notification = PushNotification {
            title: "Missed call".to_string(),
            body: format!("Missed call from {caller_name}"),
            data: serde_json::json!({ "call_id": call_id, "kind": "missed_call" }),
        };
        self.send_resilient(device_token, &notification).await
    }

    /// Dispatched to each callee at call-initiation time (§4.6, §4.11),
    /// distinct from the missed-call notification sent once the call ends
    /// unanswered.
    pub async fn notify_incoming_call(&self, device_token: &str, caller_name: &str, call_id: Uuid) -> PushOutcome {
        let notification = PushNotification {
            title: "Incoming call".to_string(),
            body: format!("{caller_name} is calling"),
            data: serde_json::json!({ "call_id": call_id, "kind": "incoming_call" }),
        };
        self.send_resilient(device_token, &notification).await
    }
}
