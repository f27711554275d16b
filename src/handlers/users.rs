use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::{User, UserDto};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/users/@me",
    responses((status = 200, description = "The authenticated user's profile")),
    security(("bearer_auth" = [])),
)]
pub async fn get_current_user(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Value>> {
    let row = sqlx::query_as::<_, User>(
        r#"SELECT id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at
           FROM users WHERE id = $1"#,
    )
    .bind(user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    Ok(Json(json!({ "success": true, "data": UserDto::from(row) })))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = uuid::Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "The requested user's profile"),
        (status = 404, description = "No user with that id"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn get_user_by_id(
    State(state): State<AppState>,
    _user: AuthUser,
    axum::extract::Path(user_id): axum::extract::Path<uuid::Uuid>,
) -> AppResult<Json<Value>> {
    let row = sqlx::query_as::<_, User>(
        r#"SELECT id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at
           FROM users WHERE id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    Ok(Json(json!({ "success": true, "data": UserDto::from(row) })))
}
