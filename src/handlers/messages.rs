use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::handlers::shared::{require_participant, validation_error};
use crate::message_store::Cursor;
use crate::models::SendMessageRequest;
use crate::rate_limit::RateLimitPolicy;
use crate::state::AppState;

const SEND_MESSAGE_POLICY: RateLimitPolicy = RateLimitPolicy {
    max_requests: 30,
    window: std::time::Duration::from_secs(60),
};

#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Message appended and broadcast to the conversation"),
        (status = 403, description = "Caller is not a participant"),
        (status = 429, description = "Send rate limit exceeded"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;
    require_participant(&state.pool, conversation_id, user.user_id()).await?;

    let rate_key = format!("send_message:{}", user.user_id());
    state.rate_limiter.check(&rate_key, SEND_MESSAGE_POLICY).await?;

    let message = state
        .messages
        .append(conversation_id, user.user_id(), &body.body)
        .await?;

    if let Ok(payload) = serde_json::to_string(&json!({ "event": "message", "message": &message })) {
        state.chat_hub.broadcast(conversation_id, payload, None).await;
    }

    Ok(Json(json!({ "success": true, "data": message })))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub before_message_id: Option<Uuid>,
    pub before_sequence: Option<i64>,
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses((status = 200, description = "A page of messages, newest first")),
    security(("bearer_auth" = [])),
)]
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, conversation_id, user.user_id()).await?;

    let before = match (query.before_message_id, query.before_sequence) {
        (Some(message_id), Some(sequence)) => Some(Cursor { message_id, sequence }),
        _ => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let messages = state.messages.page(conversation_id, before, limit).await?;
    Ok(Json(json!({ "success": true, "data": messages })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;
    require_participant(&state.pool, conversation_id, user.user_id()).await?;

    let existing = state.messages.get(conversation_id, message_id).await?;
    if existing.sender_id != user.user_id() {
        return Err(AppError::Forbidden("cannot edit another user's message".into()));
    }

    let message = state.messages.edit(conversation_id, message_id, &body.body).await?;

    if let Ok(payload) = serde_json::to_string(&json!({ "event": "message_edited", "message": &message })) {
        state.chat_hub.broadcast(conversation_id, payload, None).await;
    }

    Ok(Json(json!({ "success": true, "data": message })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, conversation_id, user.user_id()).await?;
    let existing = state.messages.get(conversation_id, message_id).await?;
    if existing.sender_id != user.user_id() {
        return Err(AppError::Forbidden("cannot delete another user's message".into()));
    }
    state.messages.soft_delete(conversation_id, message_id).await?;

    if let Ok(payload) = serde_json::to_string(&json!({ "event": "message_deleted", "message_id": message_id })) {
        state.chat_hub.broadcast(conversation_id, payload, None).await;
    }

    Ok(Json(json!({ "success": true })))
}
