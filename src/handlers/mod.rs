pub mod auth;
pub mod calls;
pub mod conversations;
pub mod messages;
pub mod push_tokens;
pub mod shared;
pub mod storage;
pub mod users;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and its dependencies are healthy"),
        (status = 503, description = "Database is unreachable"),
    ),
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = ?e, "Health check: database query failed");
            false
        }
    };
    let kv_ok = !state.kv.is_degraded();

    let http_status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": "meridian-server",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if db_ok { "ok" } else { "unavailable" },
            "kv": if kv_ok { "ok" } else { "degraded" },
        })),
    )
}
