use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::handlers::shared::validation_error;
use crate::models::{FileRecord, FileStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct IssueUploadUrlRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(length(min = 1, max = 255))]
    pub content_type: String,
}

#[utoipa::path(
    post,
    path = "/uploads",
    responses((status = 200, description = "Pre-signed upload URL issued for a pending file record")),
    security(("bearer_auth" = [])),
)]
pub async fn issue_upload_url(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<IssueUploadUrlRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    let file_id = Uuid::new_v4();
    let ticket = state
        .blobs
        .issue_upload_url(user.user_id(), file_id, &body.filename, state.config.presigned_url_ttl)
        .await?;

    sqlx::query(
        r#"INSERT INTO file_records (id, owner_id, object_key, filename, content_type, size_bytes, status, created_at)
           VALUES ($1, $2, $3, $4, $5, NULL, 'pending', $6)"#,
    )
    .bind(file_id)
    .bind(user.user_id())
    .bind(&ticket.object_key)
    .bind(&body.filename)
    .bind(&body.content_type)
    .bind(chrono::Utc::now())
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "file_id": file_id, "upload_url": ticket.upload_url, "expires_at": ticket.expires_at },
    })))
}

pub async fn confirm_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let record = sqlx::query_as::<_, FileRecord>(
        r#"SELECT id, owner_id, object_key, filename, content_type, size_bytes, status, created_at
           FROM file_records WHERE id = $1 AND owner_id = $2"#,
    )
    .bind(file_id)
    .bind(user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("upload not found".into()))?;

    let size_bytes = state.blobs.confirm_upload(&record.object_key).await?;

    sqlx::query("UPDATE file_records SET status = 'confirmed', size_bytes = $1 WHERE id = $2")
        .bind(size_bytes as i64)
        .bind(file_id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({ "success": true, "data": { "size_bytes": size_bytes } })))
}

#[utoipa::path(
    get,
    path = "/files/{id}/download-url",
    params(("id" = Uuid, Path, description = "File id")),
    responses(
        (status = 200, description = "Pre-signed download URL"),
        (status = 404, description = "File not found or not yet confirmed"),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn issue_download_url(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let record = sqlx::query_as::<_, FileRecord>(
        r#"SELECT id, owner_id, object_key, filename, content_type, size_bytes, status, created_at
           FROM file_records WHERE id = $1"#,
    )
    .bind(file_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    if record.status != FileStatus::Confirmed {
        return Err(AppError::NotFound("file not found".into()));
    }

    let ticket = state
        .blobs
        .issue_download_url(&record.object_key, state.config.presigned_url_ttl)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "download_url": ticket.download_url, "expires_at": ticket.expires_at },
    })))
}
