//! Presence tracking (§4.13). Entirely KV-resident with a TTL — presence is
//! a cache of "last seen alive", not a record of truth, so it's allowed to
//! simply disappear if KV is degraded rather than needing a fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::resilience::kv::KvClient;

const PRESENCE_TTL: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Clone)]
pub struct PresenceTracker {
    kv: KvClient,
}

impl PresenceTracker {
    pub fn new(kv: KvClient) -> Self {
        Self { kv }
    }

    fn key(user_id: Uuid) -> String {
        format!("presence:{user_id}")
    }

    pub async fn set_online(&self, user_id: Uuid) -> AppResult<()> {
        self.kv
            .set_ex(&Self::key(user_id), "online", PRESENCE_TTL)
            .await
    }

    /// Touch extends the TTL without changing status — used on heartbeat
    /// frames so presence doesn't expire under a long-lived connection.
    pub async fn touch(&self, user_id: Uuid) -> AppResult<()> {
        self.set_online(user_id).await
    }

    pub async fn set_offline(&self, user_id: Uuid) -> AppResult<()> {
        self.kv.del(&Self::key(user_id)).await
    }

    /// Offline is the default when the key has expired or KV is degraded —
    /// presence degrades to "assume offline", never to a stale "online".
    pub async fn get(&self, user_id: Uuid) -> PresenceStatus {
        match self.kv.get(&Self::key(user_id)).await {
            Ok(Some(_)) => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        }
    }
}
