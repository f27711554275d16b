use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Closed error taxonomy (see spec §7). Every fallible operation in the core
/// returns one of these variants; handlers never construct ad-hoc status
/// codes from strings.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited {
        limit: u64,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("Dependency unavailable: {0}")]
    Unavailable(UnavailableReason),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error")]
    Internal,

    #[error("Account locked")]
    AccountLocked { retry_after_secs: i64 },

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Call at capacity")]
    CallAtCapacity,
}

/// Sub-reason surfaced alongside `AppError::Unavailable`, matching the
/// machine-readable codes in the HTTP surface (`POOL_EXHAUSTED`,
/// `DB_ACQUIRE_TIMEOUT`, `KV_UNAVAILABLE`, `CAPACITY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    PoolExhausted,
    DbAcquireTimeout,
    KvUnavailable,
    PushUnavailable,
    Capacity,
}

impl UnavailableReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnavailableReason::PoolExhausted => "POOL_EXHAUSTED",
            UnavailableReason::DbAcquireTimeout => "DB_ACQUIRE_TIMEOUT",
            UnavailableReason::KvUnavailable => "KV_UNAVAILABLE",
            UnavailableReason::PushUnavailable => "PUSH_UNAVAILABLE",
            UnavailableReason::Capacity => "CAPACITY",
        }
    }
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Map sqlx errors to AppError, with special handling for unique-constraint
/// violations (PG error code 23505) so they surface as 409 Conflict rather
/// than 500 Internal Server Error. Anything else is logged with the real
/// error and collapsed to `Internal` — dependency identities never reach
/// the caller.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some(c) if c.contains("username") => "Username already taken",
                    Some(c) if c.contains("email") => "Email already registered",
                    Some(c) if c.contains("direct") => "Direct conversation already exists",
                    _ => "Resource already exists",
                };
                return AppError::Conflict(message.into());
            }
        }
        tracing::error!(error = ?e, "database error");
        AppError::Internal
    }
}

pub type AppResult<T> = Result<T, AppError>;

fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Validation(_) => "VALIDATION",
        AppError::Unauthenticated(_) => "UNAUTHENTICATED",
        AppError::Forbidden(_) => "FORBIDDEN",
        AppError::NotFound(_) => "NOT_FOUND",
        AppError::Conflict(_) => "CONFLICT",
        AppError::RateLimited { .. } => "RATE_LIMITED",
        AppError::Unavailable(reason) => reason.code(),
        AppError::Timeout => "TIMEOUT",
        AppError::Internal => "INTERNAL",
        AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
        AppError::TokenRevoked => "TOKEN_REVOKED",
        AppError::CallAtCapacity => "CALL_AT_CAPACITY",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) | AppError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::AccountLocked { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CallAtCapacity => StatusCode::BAD_REQUEST,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error surfaced to caller");
        }

        let mut body = json!({
            "success": false,
            "error": {
                "code": error_code(&self),
                "message": self.to_string(),
            }
        });

        match &self {
            AppError::RateLimited { retry_after_secs, .. } => {
                body["error"]["retry_after"] = json!(retry_after_secs);
            }
            AppError::AccountLocked { retry_after_secs } => {
                body["error"]["retry_after"] = json!((*retry_after_secs).max(0));
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited {
            limit,
            window_secs,
            retry_after_secs,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("RateLimit-Remaining", HeaderValue::from(0u64));
            headers.insert("RateLimit-Reset", HeaderValue::from(*retry_after_secs));
            headers.insert("RateLimit-Window", HeaderValue::from(*window_secs));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_error_returns_400() {
        let response = AppError::Validation("bad input".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_revoked_returns_401() {
        let response = AppError::TokenRevoked.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn call_at_capacity_returns_400_with_code() {
        let response = AppError::CallAtCapacity.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "CALL_AT_CAPACITY");
    }

    #[tokio::test]
    async fn unavailable_pool_exhausted_returns_503_with_code() {
        let response = AppError::Unavailable(UnavailableReason::PoolExhausted).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "POOL_EXHAUSTED");
    }

    #[tokio::test]
    async fn timeout_returns_504() {
        let response = AppError::Timeout.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn rate_limited_body_has_retry_after() {
        let response = AppError::RateLimited {
            limit: 10,
            window_secs: 60,
            retry_after_secs: 30,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let json = body_json(response).await;
        assert_eq!(json["error"]["retry_after"], 30);
    }

    #[tokio::test]
    async fn rate_limited_sets_rate_limit_headers() {
        let response = AppError::RateLimited {
            limit: 10,
            window_secs: 60,
            retry_after_secs: 30,
        }
        .into_response();
        let headers = response.headers();
        assert_eq!(headers.get("RateLimit-Limit").unwrap(), "10");
        assert_eq!(headers.get("RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("RateLimit-Reset").unwrap(), "30");
        assert_eq!(headers.get("RateLimit-Window").unwrap(), "60");
    }

    #[tokio::test]
    async fn not_found_body_has_code_and_message() {
        let response = AppError::NotFound("conversation not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["success"], false);
    }

    #[test]
    fn sqlx_unique_violation_on_username_maps_to_conflict() {
        // sqlx::Error::Database requires constructing a live error from the
        // driver; the mapping logic itself (constraint-name sniffing) is
        // exercised indirectly via the handler integration tests, so here we
        // only assert the code-table is wired for Conflict generally.
        let err = AppError::Conflict("Username already taken".into());
        assert_eq!(error_code(&err), "CONFLICT");
    }
}
