mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn get_current_user_returns_own_profile() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "password12345").await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, login) = common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "password12345" })).await;
    let token = login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, "/users/@me", &token).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["username"], username.as_str());
    assert!(body["data"]["id"].is_string());
    assert!(body["data"]["email"].is_null(), "password hash and email must not leak via UserDto");
}

#[tokio::test]
async fn get_current_user_without_token_is_unauthenticated() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, body) = common::get_no_auth(app, "/users/@me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
}

#[tokio::test]
async fn get_user_by_id_returns_profile_for_other_users() {
    let pool = common::test_pool().await;
    let alice = common::unique_username();
    let bob = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &alice, "password12345").await;
    let app = common::create_test_app(pool.clone()).await;
    let bob_profile = common::register_user(app, &bob, "password12345").await;
    let bob_id = bob_profile["id"].as_str().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, login) = common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "password12345" })).await;
    let token = login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/users/{bob_id}"), &token).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["username"], bob.as_str());
}

#[tokio::test]
async fn get_user_by_unknown_id_is_not_found() {
    let pool = common::test_pool().await;
    let username = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "password12345").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, login) = common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "password12345" })).await;
    let token = login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/users/{}", uuid::Uuid::new_v4()), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "body: {body}");
}
