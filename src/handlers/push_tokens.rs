use axum::{extract::State, Json};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::handlers::shared::validation_error;
use crate::models::RegisterPushTokenRequest;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/push-tokens",
    responses((status = 200, description = "Device token registered for push delivery")),
    security(("bearer_auth" = [])),
)]
pub async fn register_push_token(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RegisterPushTokenRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    sqlx::query(
        r#"INSERT INTO push_tokens (id, user_id, platform, device_token, created_at)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (user_id, device_token) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id())
    .bind(body.platform)
    .bind(&body.device_token)
    .bind(chrono::Utc::now())
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    delete,
    path = "/push-tokens/{id}",
    params(("id" = Uuid, Path, description = "Push token id")),
    responses((status = 200, description = "Token removed if owned by the caller")),
    security(("bearer_auth" = [])),
)]
pub async fn delete_push_token(
    State(state): State<AppState>,
    user: AuthUser,
    axum::extract::Path(token_id): axum::extract::Path<Uuid>,
) -> AppResult<Json<Value>> {
    sqlx::query("DELETE FROM push_tokens WHERE id = $1 AND user_id = $2")
        .bind(token_id)
        .bind(user.user_id())
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "success": true })))
}
