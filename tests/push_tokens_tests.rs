mod common;

use axum::http::StatusCode;
use serde_json::json;

async fn authed_token(pool: &sqlx::PgPool, username: &str) -> String {
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, username, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, login) = common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "securepassword123" })).await;
    login["data"]["access_token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn register_push_token_is_idempotent() {
    let pool = common::test_pool().await;
    let token = authed_token(&pool, &common::unique_username()).await;

    for _ in 0..2 {
        let app = common::create_test_app(pool.clone()).await;
        let (status, body) = common::post_json_authed(
            app,
            "/push-tokens",
            &token,
            json!({ "platform": "ios", "device_token": "abc123" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
    }
}

#[tokio::test]
async fn delete_push_token_only_affects_owner() {
    let pool = common::test_pool().await;
    let alice_token = authed_token(&pool, &common::unique_username()).await;

    let app = common::create_test_app(pool).await;
    let (status, _) = common::delete_authed(app, &format!("/push-tokens/{}", uuid::Uuid::new_v4()), &alice_token).await;
    // Deleting a token that doesn't exist (or isn't owned) is a no-op success.
    assert_eq!(status, StatusCode::OK);
}
