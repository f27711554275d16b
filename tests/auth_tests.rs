mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn register_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;
    let username = common::unique_username();

    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "username": username, "email": format!("{username}@example.com"), "password": "securepassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["data"]["id"].is_string());
    assert_eq!(body["data"]["username"], username.as_str());
}

#[tokio::test]
async fn register_duplicate_username_conflicts() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "securepassword123").await;

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "username": username, "email": format!("{username}-2@example.com"), "password": "anotherpassword123" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT, "body: {body}");
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn register_validates_short_password() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;
    let username = common::unique_username();

    let (status, body) = common::post_json(
        app,
        "/auth/register",
        json!({ "username": username, "email": format!("{username}@example.com"), "password": "short12" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

#[tokio::test]
async fn login_success_and_access_token_works() {
    let pool = common::test_pool().await;
    let username = common::unique_username();
    let password = "securepassword123";

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, password).await;

    let app = common::create_test_app(pool.clone()).await;
    let (status, body) = common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": password })).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let access_token = body["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, me) = common::get_authed(app, "/users/@me", &access_token).await;
    assert_eq!(status, StatusCode::OK, "access token rejected: {me}");
    assert_eq!(me["data"]["username"], username.as_str());
}

#[tokio::test]
async fn login_wrong_password_is_unauthenticated() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "correctpassword123").await;

    let app = common::create_test_app(pool).await;
    let (status, body) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "wrongpassword999" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn refresh_token_rejected_as_bearer_token() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool.clone()).await;
    let username = common::unique_username();

    let app2 = common::create_test_app(pool.clone()).await;
    common::register_user(app2, &username, "securepassword123").await;
    let (status, body) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "securepassword123" })).await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let refresh_token = body["data"]["refresh_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, "/users/@me", &refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "refresh token should be rejected as bearer: {body}");
}

#[tokio::test]
async fn refresh_token_rotates_and_old_session_is_revoked() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (status, login_body) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "securepassword123" })).await;
    assert_eq!(status, StatusCode::OK);
    let refresh_token = login_body["data"]["refresh_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (status, refreshed) = common::post_json(app, "/auth/refresh", json!({ "refresh_token": refresh_token.clone() })).await;
    assert_eq!(status, StatusCode::OK, "refresh failed: {refreshed}");
    let new_access = refreshed["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (status, me) = common::get_authed(app, "/users/@me", &new_access).await;
    assert_eq!(status, StatusCode::OK, "rotated access token rejected: {me}");

    // Reusing the now-revoked refresh token must fail.
    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json(app, "/auth/refresh", json!({ "refresh_token": refresh_token })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "rotated refresh token should be rejected on reuse: {body}");
}

#[tokio::test]
async fn logout_blacklists_access_token() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, login_body) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "securepassword123" })).await;
    let access_token = login_body["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (status, _) = common::post_json_authed(app, "/auth/logout", &access_token, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, "/users/@me", &access_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "blacklisted token should be rejected: {body}");
}

#[tokio::test]
async fn password_reset_request_always_returns_success() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, body) =
        common::post_json(app, "/auth/password-reset", json!({ "email": "nobody-at-all@example.com" })).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
}
