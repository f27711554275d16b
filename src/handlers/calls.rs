use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::calls::notify_missed_call_participants;
use crate::error::AppResult;
use crate::handlers::shared::require_participant;
use crate::models::CallType;
use crate::state::AppState;

fn default_call_type() -> CallType {
    CallType::Audio
}

#[derive(Debug, Deserialize)]
pub struct InitiateCallRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub callee_ids: Vec<Uuid>,
    #[serde(default = "default_call_type")]
    pub call_type: CallType,
}

/// Looks up the caller-facing name and each callee's registered device
/// tokens so push dispatch can happen outside the orchestrator's DB
/// transaction, mirroring the lookup `notify_missed_call_participants`
/// expects its caller to have already done.
async fn caller_display_name(state: &AppState, user_id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT COALESCE(display_name, username) FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "Someone".to_string())
}

async fn device_tokens_for(state: &AppState, user_ids: &[Uuid]) -> Vec<(Uuid, String)> {
    sqlx::query_as::<_, (Uuid, String)>("SELECT user_id, device_token FROM push_tokens WHERE user_id = ANY($1)")
        .bind(user_ids)
        .fetch_all(&state.pool)
        .await
        .unwrap_or_default()
}

#[utoipa::path(
    post,
    path = "/calls",
    responses(
        (status = 200, description = "Call created, returns the call and TURN/ICE servers"),
        (status = 403, description = "Caller is not a participant in the conversation"),
        (status = 409, description = "Conversation has reached its concurrent call capacity"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn initiate_call(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<InitiateCallRequest>,
) -> AppResult<Json<Value>> {
    require_participant(&state.pool, body.conversation_id, user.user_id()).await?;

    let call = state
        .calls
        .initiate(body.conversation_id, user.user_id(), &body.callee_ids, body.call_type)
        .await?;
    let ice_servers = state.calls.ice_servers(user.user_id());

    if !body.callee_ids.is_empty() {
        let caller_name = caller_display_name(&state, user.user_id()).await;
        let device_tokens = device_tokens_for(&state, &body.callee_ids).await;
        for (_, token) in &device_tokens {
            state.push.notify_incoming_call(token, &caller_name, call.id).await;
        }
    }

    Ok(Json(json!({ "success": true, "data": { "call": call, "ice_servers": ice_servers } })))
}

pub async fn join_call(
    State(state): State<AppState>,
    user: AuthUser,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let participant = state.calls.join(call_id, user.user_id()).await?;
    let ice_servers = state.calls.ice_servers(user.user_id());

    Ok(Json(json!({ "success": true, "data": { "participant": participant, "ice_servers": ice_servers } })))
}

pub async fn leave_call(
    State(state): State<AppState>,
    user: AuthUser,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    state.calls.leave(call_id, user.user_id()).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn end_call(
    State(state): State<AppState>,
    user: AuthUser,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let unjoined = state.calls.invited_but_unjoined(call_id).await.unwrap_or_default();

    state.calls.end(call_id).await?;

    if !unjoined.is_empty() {
        let caller_name = caller_display_name(&state, user.user_id()).await;
        let device_tokens = device_tokens_for(&state, &unjoined).await;
        notify_missed_call_participants(&state.calls, &state.push, call_id, &caller_name, &device_tokens).await;
    }

    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    get,
    path = "/calls/ice-servers",
    responses((status = 200, description = "Short-lived TURN/ICE credentials for the caller")),
    security(("bearer_auth" = [])),
)]
pub async fn ice_servers(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Value>> {
    let ice_servers = state.calls.ice_servers(user.user_id());
    Ok(Json(json!({ "success": true, "data": ice_servers })))
}
