mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn create_direct_conversation_adds_both_participants() {
    let pool = common::test_pool().await;
    let alice = common::unique_username();
    let bob = common::unique_username();

    let app = common::create_test_app(pool.clone()).await;
    let alice_user = common::register_user(app, &alice, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let bob_user = common::register_user(app, &bob, "securepassword123").await;
    let bob_id: Uuid = bob_user["id"].as_str().unwrap().parse().unwrap();

    let _ = alice_user;

    let app = common::create_test_app(pool.clone()).await;
    let (status, login) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    assert_eq!(status, StatusCode::OK);
    let alice_token = login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "direct", &[bob_id]).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (status, participants) = common::get_authed(app, &format!("/conversations/{conversation_id}/participants"), &alice_token).await;
    assert_eq!(status, StatusCode::OK, "body: {participants}");
    assert_eq!(participants["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn non_participant_cannot_read_conversation() {
    let pool = common::test_pool().await;
    let alice = common::unique_username();
    let bob = common::unique_username();
    let eve = common::unique_username();

    for u in [&alice, &bob, &eve] {
        let app = common::create_test_app(pool.clone()).await;
        common::register_user(app, u, "securepassword123").await;
    }

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_id: Uuid = bob_login["data"]["user"]["id"].as_str().unwrap().parse().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, alice_login) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    let alice_token = alice_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "direct", &[bob_id]).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, eve_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{eve}@example.com"), "password": "securepassword123" })).await;
    let eve_token = eve_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/conversations/{conversation_id}"), &eve_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");
}

#[tokio::test]
async fn direct_conversation_rejects_add_participant() {
    let pool = common::test_pool().await;
    let alice = common::unique_username();
    let bob = common::unique_username();
    let carol = common::unique_username();

    for u in [&alice, &bob, &carol] {
        let app = common::create_test_app(pool.clone()).await;
        common::register_user(app, u, "securepassword123").await;
    }

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_id: Uuid = bob_login["data"]["user"]["id"].as_str().unwrap().parse().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, carol_login) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{carol}@example.com"), "password": "securepassword123" })).await;
    let carol_id: Uuid = carol_login["data"]["user"]["id"].as_str().unwrap().parse().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, alice_login) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    let alice_token = alice_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "direct", &[bob_id]).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(
        app,
        &format!("/conversations/{conversation_id}/participants/{carol_id}"),
        &alice_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "body: {body}");
}

#[tokio::test]
async fn group_conversation_admin_can_add_participant() {
    let pool = common::test_pool().await;
    let alice = common::unique_username();
    let bob = common::unique_username();

    for u in [&alice, &bob] {
        let app = common::create_test_app(pool.clone()).await;
        common::register_user(app, u, "securepassword123").await;
    }

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_id: Uuid = bob_login["data"]["user"]["id"].as_str().unwrap().parse().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, alice_login) =
        common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    let alice_token = alice_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "group", &[]).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (status, body) = common::post_json_authed(
        app,
        &format!("/conversations/{conversation_id}/participants/{bob_id}"),
        &alice_token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let app = common::create_test_app(pool).await;
    let (status, participants) = common::get_authed(app, &format!("/conversations/{conversation_id}/participants"), &alice_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(participants["data"].as_array().unwrap().len(), 2);
}
