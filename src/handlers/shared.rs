use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Participant};

/// Resolves the caller's IP for lockout/rate-limit keying. Prefers the
/// proxy-supplied `X-Forwarded-For` (first hop) since the server typically
/// sits behind a load balancer; falls back to the socket's peer address.
pub fn client_ip(connect_info: Option<&ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    if let Some(value) = headers.get("x-forwarded-for") {
        if let Ok(raw) = value.to_str() {
            if let Some(first) = raw.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Convert [`validator::ValidationErrors`] into an [`AppError::Validation`]
/// with a human-readable message. Shared across all handler modules to
/// avoid copy-pasting the same boilerplate.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

pub async fn fetch_conversation(pool: &sqlx::PgPool, conversation_id: Uuid) -> AppResult<Conversation> {
    sqlx::query_as::<_, Conversation>(
        "SELECT id, kind, title, created_by, created_at FROM conversations WHERE id = $1",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("conversation not found".into()))
}

/// Verify the user is a participant in the conversation. Returns 404 (not
/// 403) when they are not a member, so membership can't be probed by a
/// non-member via status-code difference.
pub async fn require_participant(
    pool: &sqlx::PgPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<Participant> {
    sqlx::query_as::<_, Participant>(
        "SELECT conversation_id, user_id, role, joined_at, last_read_sequence
         FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("conversation not found".into()))
}
