mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

async fn direct_conversation(pool: &sqlx::PgPool, alice: &str, bob: &str) -> (String, String, String) {
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, alice, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, bob, "securepassword123").await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_id: Uuid = bob_login["data"]["user"]["id"].as_str().unwrap().parse().unwrap();
    let bob_token = bob_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (_, alice_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    let alice_token = alice_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "direct", &[bob_id]).await;
    let conversation_id = conversation["id"].as_str().unwrap().to_owned();

    (alice_token, bob_token, conversation_id)
}

#[tokio::test]
async fn initiate_call_returns_ice_servers() {
    let pool = common::test_pool().await;
    let (alice_token, _, conversation_id) =
        direct_conversation(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool).await;
    let (status, body) =
        common::post_json_authed(app, "/calls", &alice_token, json!({ "conversation_id": conversation_id })).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(body["data"]["call"]["id"].is_string());
    assert!(!body["data"]["ice_servers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn non_participant_cannot_initiate_call() {
    let pool = common::test_pool().await;
    let (_, _, conversation_id) = direct_conversation(&pool, &common::unique_username(), &common::unique_username()).await;

    let eve = common::unique_username();
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &eve, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, eve_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{eve}@example.com"), "password": "securepassword123" })).await;
    let eve_token = eve_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) =
        common::post_json_authed(app, "/calls", &eve_token, json!({ "conversation_id": conversation_id })).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");
}

#[tokio::test]
async fn second_participant_can_join_call() {
    let pool = common::test_pool().await;
    let (alice_token, bob_token, conversation_id) =
        direct_conversation(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, call) =
        common::post_json_authed(app, "/calls", &alice_token, json!({ "conversation_id": conversation_id })).await;
    let call_id = call["data"]["call"]["id"].as_str().unwrap();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(app, &format!("/calls/{call_id}/join"), &bob_token, json!({})).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
}

#[tokio::test]
async fn initiate_call_invites_callees_and_accepts_call_type() {
    let pool = common::test_pool().await;
    let (alice_token, _, conversation_id) =
        direct_conversation(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(
        app,
        "/calls",
        &alice_token,
        json!({ "conversation_id": conversation_id, "call_type": "video" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["call"]["call_type"], "video");
}

#[tokio::test]
async fn initiate_call_rejects_too_many_callees() {
    let pool = common::test_pool().await;
    let (alice_token, _, conversation_id) =
        direct_conversation(&pool, &common::unique_username(), &common::unique_username()).await;

    let filler_ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(
        app,
        "/calls",
        &alice_token,
        json!({ "conversation_id": conversation_id, "callee_ids": filler_ids }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}

#[tokio::test]
async fn ice_servers_endpoint_issues_turn_credentials() {
    let pool = common::test_pool().await;
    let username = common::unique_username();
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &username, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, login) = common::post_json(app, "/auth/login", json!({ "email": format!("{username}@example.com"), "password": "securepassword123" })).await;
    let token = login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, "/calls/ice-servers", &token).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let servers = body["data"].as_array().unwrap();
    assert!(!servers.is_empty());
    assert!(servers[0]["credential"].is_string());
}
