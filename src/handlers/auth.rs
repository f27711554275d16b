use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    create_access_token, create_refresh_token, hash_password, hash_refresh_token, validate_token,
    verify_password, AuthUser, TokenType,
};
use crate::error::{AppError, AppResult};
use crate::handlers::shared::{client_ip, validation_error};
use crate::models::{LoginRequest, RegisterRequest, User, UserDto};
use crate::rate_limit::RateLimitPolicy;
use crate::state::AppState;

/// §4.3: password-reset request is rate-limited 3/min/IP.
const PASSWORD_RESET_REQUEST_POLICY: RateLimitPolicy = RateLimitPolicy {
    max_requests: 3,
    window: std::time::Duration::from_secs(60),
};

/// §4.3: password-reset confirm is rate-limited 5/min/IP.
const PASSWORD_RESET_CONFIRM_POLICY: RateLimitPolicy = RateLimitPolicy {
    max_requests: 5,
    window: std::time::Duration::from_secs(60),
};

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserDto,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    responses(
        (status = 200, description = "Account created"),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Username or email already taken"),
    ),
)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    let password_hash = hash_password(&body.password)?;
    let user = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (id, username, email, password_hash, role, created_at, updated_at)
           VALUES ($1, $2, $3, $4, 'member', $5, $5)
           RETURNING id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.username)
    .bind(&body.email)
    .bind(&password_hash)
    .bind(chrono::Utc::now())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true, "data": UserDto::from(user) })))
}

async fn issue_token_pair(state: &AppState, user: &User) -> AppResult<TokenPair> {
    let (access_token, _) = create_access_token(
        user.id,
        &user.role,
        &state.config.jwt_secret,
        &state.config.jwt_audience,
        chrono::Duration::from_std(state.config.access_token_ttl).unwrap_or_else(|_| chrono::Duration::zero()),
    )?;
    let (refresh_token, _) = create_refresh_token(
        user.id,
        &user.role,
        &state.config.jwt_secret,
        &state.config.jwt_audience,
        chrono::Duration::from_std(state.config.refresh_token_ttl).unwrap_or_else(|_| chrono::Duration::zero()),
    )?;

    state
        .sessions
        .create(
            user.id,
            &hash_refresh_token(&refresh_token),
            chrono::Duration::from_std(state.config.refresh_token_ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        )
        .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        user: UserDto::from(user.clone()),
    })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    responses(
        (status = 200, description = "Issues an access/refresh token pair"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account locked after repeated failed attempts"),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    let ip = client_ip(connect_info.as_ref(), &headers);

    if let Some(remaining) = state.sessions.lockout_remaining(&ip, &body.email).await {
        return Err(AppError::AccountLocked {
            retry_after_secs: remaining,
        });
    }

    let user = sqlx::query_as::<_, User>(
        r#"SELECT id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at
           FROM users WHERE email = $1"#,
    )
    .bind(&body.email)
    .fetch_optional(&state.pool)
    .await?;

    let user = match user {
        Some(u) if verify_password(&body.password, &u.password_hash)? => u,
        _ => {
            state
                .sessions
                .record_failed_login(
                    &ip,
                    &body.email,
                    state.config.lockout_threshold,
                    state.config.lockout_window,
                    state.config.lockout_duration,
                )
                .await;
            return Err(AppError::Unauthenticated("invalid email or password".into()));
        }
    };

    state.sessions.clear_failed_logins(&ip, &body.email).await;
    let pair = issue_token_pair(&state, &user).await?;
    Ok(Json(json!({ "success": true, "data": pair })))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotates the refresh token and issues a new pair"),
        (status = 401, description = "Refresh token invalid, expired, or already rotated"),
    ),
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<Value>> {
    let claims = validate_token(&body.refresh_token, &state.config.jwt_secret, &state.config.jwt_audience)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthenticated("not a refresh token".into()));
    }

    let hash = hash_refresh_token(&body.refresh_token);
    let session = state
        .sessions
        .find_by_hash(&hash)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("session not found".into()))?;

    if session.revoked_at.is_some() || session.expires_at < chrono::Utc::now() {
        return Err(AppError::Unauthenticated("session expired or revoked".into()));
    }

    let user_id = claims.user_id()?;
    let user = sqlx::query_as::<_, User>(
        r#"SELECT id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at
           FROM users WHERE id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::Unauthenticated("user no longer exists".into()))?;

    // Rotate: revoke the consumed refresh token's session, issue a fresh pair.
    state.sessions.revoke(session.id).await?;
    let pair = issue_token_pair(&state, &user).await?;
    Ok(Json(json!({ "success": true, "data": pair })))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Blacklists the current access token")),
    security(("bearer_auth" = [])),
)]
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Value>> {
    state
        .sessions
        .blacklist_access_token(user.token_id(), state.config.access_token_ttl)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    get,
    path = "/auth/validate",
    responses((status = 200, description = "Confirms the bearer token is valid and returns its claims")),
    security(("bearer_auth" = [])),
)]
pub async fn validate(user: AuthUser) -> AppResult<Json<Value>> {
    Ok(Json(json!({ "success": true, "data": { "user_id": user.user_id(), "role": user.role() } })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}

/// Always returns success regardless of whether the email matches an
/// account, so the endpoint cannot be used to enumerate registered emails.
#[utoipa::path(
    post,
    path = "/auth/password-reset",
    responses((status = 200, description = "Reset token issued if the email matches an account")),
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    state
        .rate_limiter
        .check(&format!("pwreset:{}", body.email), PASSWORD_RESET_REQUEST_POLICY)
        .await?;

    if let Some(user) = sqlx::query_as::<_, User>(
        r#"SELECT id, username, email, password_hash, display_name, avatar_url, role, created_at, updated_at
           FROM users WHERE email = $1"#,
    )
    .bind(&body.email)
    .fetch_optional(&state.pool)
    .await?
    {
        let reset_token = Uuid::new_v4().to_string();
        let key = format!("pwreset:{}", hash_refresh_token(&reset_token));
        let _ = state
            .kv
            .set_ex(&key, &user.id.to_string(), state.config.password_reset_token_ttl)
            .await;
        tracing::info!(user_id = %user.id, "password reset token issued");
    }

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    pub reset_token: String,
    #[validate(length(min = 8, max = 256))]
    pub new_password: String,
}

#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    responses(
        (status = 200, description = "Password updated, all sessions revoked"),
        (status = 401, description = "Reset token invalid or expired"),
    ),
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<PasswordResetConfirm>,
) -> AppResult<Json<Value>> {
    body.validate().map_err(validation_error)?;

    let ip = client_ip(connect_info.as_ref(), &headers);
    state
        .rate_limiter
        .check(&format!("pwreset-confirm:{ip}"), PASSWORD_RESET_CONFIRM_POLICY)
        .await?;

    let key = format!("pwreset:{}", hash_refresh_token(&body.reset_token));
    let user_id_raw = state
        .kv
        .get(&key)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("reset token invalid or expired".into()))?;
    let user_id = Uuid::parse_str(&user_id_raw).map_err(|_| AppError::Internal)?;

    let password_hash = hash_password(&body.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
        .bind(&password_hash)
        .bind(chrono::Utc::now())
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    let _ = state.kv.del(&key).await;
    state.sessions.revoke_all_for_user(user_id).await?;

    Ok(Json(json!({ "success": true })))
}
