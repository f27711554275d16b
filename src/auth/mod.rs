use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub aud: String,
    /// Unique per issued token; the revocation blacklist keys on this, not
    /// on the token's signature, so a single access token can be revoked
    /// without invalidating every other token the user holds.
    pub jti: String,
    pub role: String,
    pub token_type: TokenType,
}

impl Claims {
    fn new(
        user_id: Uuid,
        role: String,
        audience: &str,
        ttl: Duration,
        token_type: TokenType,
    ) -> Self {
        let now = Utc::now();
        Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            aud: audience.to_string(),
            jti: Uuid::new_v4().to_string(),
            role,
            token_type,
        }
    }

    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthenticated("invalid token subject".into()))
    }

    pub fn ttl_remaining(&self) -> std::time::Duration {
        let remaining = self.exp - Utc::now().timestamp();
        std::time::Duration::from_secs(remaining.max(0) as u64)
    }
}

// ============================================================================
// JWT Operations
// ============================================================================

pub fn create_access_token(
    user_id: Uuid,
    role: &str,
    secret: &str,
    audience: &str,
    ttl: Duration,
) -> AppResult<(String, Claims)> {
    let claims = Claims::new(user_id, role.to_string(), audience, ttl, TokenType::Access);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = ?e, "failed to sign access token");
        AppError::Internal
    })?;
    Ok((token, claims))
}

pub fn create_refresh_token(
    user_id: Uuid,
    role: &str,
    secret: &str,
    audience: &str,
    ttl: Duration,
) -> AppResult<(String, Claims)> {
    let claims = Claims::new(user_id, role.to_string(), audience, ttl, TokenType::Refresh);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = ?e, "failed to sign refresh token");
        AppError::Internal
    })?;
    Ok((token, claims))
}

pub fn validate_token(token: &str, secret: &str, audience: &str) -> AppResult<Claims> {
    let mut validation = Validation::default();
    validation.set_audience(&[audience]);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = ?e, "token validation failed");
            AppError::Unauthenticated("invalid or expired token".into())
        })
}

// ============================================================================
// Refresh Token Hashing
// ============================================================================

/// SHA-256 rather than bcrypt: refresh tokens must be looked up by hash
/// (bcrypt is non-deterministic, so the same input hashes differently every
/// call and can't be used as a lookup key).
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Password Hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, 12).map_err(|e| {
        tracing::error!(error = ?e, "failed to hash password");
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!(error = ?e, "failed to verify password hash");
        AppError::Internal
    })
}

// ============================================================================
// Auth Middleware
// ============================================================================

/// Authenticated user extracted from a valid, non-revoked access token.
/// Fields are private: the only constructor is the `FromRequestParts` impl.
pub struct AuthUser {
    user_id: Uuid,
    role: String,
    token_id: String,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "error": { "code": "UNAUTHENTICATED", "message": message } })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("missing or invalid Authorization header"))?;

        let claims = validate_token(bearer.token(), &state.config.jwt_secret, &state.config.jwt_audience)
            .map_err(|_| auth_error("invalid or expired token"))?;

        if claims.token_type != TokenType::Access {
            return Err(auth_error("refresh tokens cannot be used as bearer credentials"));
        }

        if state.sessions.is_access_token_revoked(&claims.jti).await {
            return Err(auth_error("token has been revoked"));
        }

        let user_id = claims
            .user_id()
            .map_err(|_| auth_error("invalid token subject"))?;

        Ok(AuthUser {
            user_id,
            role: claims.role,
            token_id: claims.jti,
        })
    }
}
