use std::sync::Arc;

use sqlx::PgPool;

use crate::calls::CallOrchestrator;
use crate::chat::{ChatAdmission, ChatHub};
use crate::config::Config;
use crate::message_store::MessageStore;
use crate::presence::PresenceTracker;
use crate::push::PushDispatcher;
use crate::rate_limit::RateLimiter;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::kv::KvClient;
use crate::resilience::pool_admission::PoolAdmissionConfig;
use crate::resilience::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::signaling::{SignalingAdmission, SignalingHub};
use crate::storage::BlobStore;

/// Composition root. Every handler and extractor reaches the rest of the
/// system through this struct; cloning it is cheap (every field is an
/// `Arc`, a connection-manager handle, or a plain config value).
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub kv: KvClient,
    pub config: Arc<Config>,

    /// Generic circuit breaker + retry policy (§4.2), shared by the push
    /// provider and the access-token revocation check — distinct from
    /// `KvClient`'s own internal degraded-state tracking, which still
    /// governs KV fail-open behavior independently.
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,

    pub sessions: SessionStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub presence: PresenceTracker,

    pub messages: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub push: Arc<PushDispatcher>,

    pub chat_hub: ChatHub,
    pub chat_admission: ChatAdmission,
    pub signaling_hub: SignalingHub,
    pub signaling_admission: SignalingAdmission,
    pub calls: Arc<CallOrchestrator>,

    pub pool_admission_config: PoolAdmissionConfig,
}

impl axum::extract::FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}

impl axum::extract::FromRef<AppState> for PoolAdmissionConfig {
    fn from_ref(state: &AppState) -> PoolAdmissionConfig {
        state.pool_admission_config
    }
}
