use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::handlers::shared::{fetch_conversation, require_participant, validation_error};
use crate::models::{Conversation, CreateConversationRequest, Participant, ParticipantRole};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/conversations",
    responses(
        (status = 200, description = "Conversation created with the caller and named participants"),
        (status = 400, description = "Validation error"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    let mut tx = state.pool.begin().await?;
    let conversation = sqlx::query_as::<_, Conversation>(
        r#"INSERT INTO conversations (id, kind, title, created_by, created_at)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING id, kind, title, created_by, created_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(body.kind)
    .bind(&body.title)
    .bind(user.user_id())
    .bind(chrono::Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    let mut member_ids = body.participant_ids.clone();
    if !member_ids.contains(&user.user_id()) {
        member_ids.push(user.user_id());
    }

    for member_id in &member_ids {
        let role = if *member_id == user.user_id() {
            ParticipantRole::Admin
        } else {
            ParticipantRole::Member
        };
        sqlx::query(
            r#"INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at, last_read_sequence)
               VALUES ($1, $2, $3, $4, 0)"#,
        )
        .bind(conversation.id)
        .bind(member_id)
        .bind(role)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(Json(json!({ "success": true, "data": conversation })))
}

#[utoipa::path(
    get,
    path = "/conversations",
    responses((status = 200, description = "Conversations the caller participates in")),
    security(("bearer_auth" = [])),
)]
pub async fn list_my_conversations(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Value>> {
    let rows = sqlx::query_as::<_, Conversation>(
        r#"SELECT c.id, c.kind, c.title, c.created_by, c.created_at
           FROM conversations c
           JOIN conversation_participants p ON p.conversation_id = c.id
           WHERE p.user_id = $1
           ORDER BY c.created_at DESC"#,
    )
    .bind(user.user_id())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true, "data": rows })))
}

#[utoipa::path(
    get,
    path = "/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation details"),
        (status = 403, description = "Caller is not a participant"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, conversation_id, user.user_id()).await?;
    let conversation = fetch_conversation(&state.pool, conversation_id).await?;
    Ok(Json(json!({ "success": true, "data": conversation })))
}

pub async fn list_participants(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, conversation_id, user.user_id()).await?;

    let rows = sqlx::query_as::<_, Participant>(
        r#"SELECT conversation_id, user_id, role, joined_at, last_read_sequence
           FROM conversation_participants WHERE conversation_id = $1
           ORDER BY joined_at ASC"#,
    )
    .bind(conversation_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true, "data": rows })))
}

/// Only an existing admin participant may add members to a group
/// conversation; direct conversations are fixed at two participants.
pub async fn add_participant(
    State(state): State<AppState>,
    user: AuthUser,
    Path((conversation_id, new_user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    let conversation = fetch_conversation(&state.pool, conversation_id).await?;
    if conversation.kind == crate::models::ConversationKind::Direct {
        return Err(AppError::Conflict("direct conversations cannot add participants".into()));
    }

    let requester = require_participant(&state.pool, conversation_id, user.user_id()).await?;
    if requester.role != ParticipantRole::Admin {
        return Err(AppError::Forbidden("only admins can add participants".into()));
    }

    sqlx::query(
        r#"INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at, last_read_sequence)
           VALUES ($1, $2, 'member', $3, 0)
           ON CONFLICT (conversation_id, user_id) DO NOTHING"#,
    )
    .bind(conversation_id)
    .bind(new_user_id)
    .bind(chrono::Utc::now())
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, conversation_id, user.user_id()).await?;
    sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2")
        .bind(conversation_id)
        .bind(user.user_id())
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "success": true })))
}
