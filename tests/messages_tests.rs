mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

async fn direct_conversation_between(
    pool: &sqlx::PgPool,
    alice: &str,
    bob: &str,
) -> (String, String, String) {
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, alice, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, bob, "securepassword123").await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_id = bob_login["data"]["user"]["id"].as_str().unwrap().to_owned();
    let bob_uuid: Uuid = bob_id.parse().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, alice_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{alice}@example.com"), "password": "securepassword123" })).await;
    let alice_token = alice_login["data"]["access_token"].as_str().unwrap().to_owned();
    let alice_id = alice_login["data"]["user"]["id"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let conversation = common::create_conversation(app, &alice_token, "direct", &[bob_uuid]).await;
    let conversation_id = conversation["id"].as_str().unwrap().to_owned();

    (alice_token, conversation_id, alice_id)
}

#[tokio::test]
async fn send_and_list_messages_orders_newest_first() {
    let pool = common::test_pool().await;
    let (alice_token, conversation_id, _) =
        direct_conversation_between(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    common::send_message(app, &alice_token, &conversation_id, "first").await;
    let app = common::create_test_app(pool.clone()).await;
    common::send_message(app, &alice_token, &conversation_id, "second").await;

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/conversations/{conversation_id}/messages"), &alice_token).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "second");
    assert_eq!(messages[1]["body"], "first");
}

#[tokio::test]
async fn non_participant_cannot_send_message() {
    let pool = common::test_pool().await;
    let (_, conversation_id, _) =
        direct_conversation_between(&pool, &common::unique_username(), &common::unique_username()).await;

    let eve = common::unique_username();
    let app = common::create_test_app(pool.clone()).await;
    common::register_user(app, &eve, "securepassword123").await;
    let app = common::create_test_app(pool.clone()).await;
    let (_, eve_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{eve}@example.com"), "password": "securepassword123" })).await;
    let eve_token = eve_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(
        app,
        &format!("/conversations/{conversation_id}/messages"),
        &eve_token,
        json!({ "body": "sneaking in" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");
}

#[tokio::test]
async fn edit_message_requires_ownership() {
    let pool = common::test_pool().await;
    let bob = common::unique_username();
    let (alice_token, conversation_id, _) = direct_conversation_between(&pool, &common::unique_username(), &bob).await;

    let app = common::create_test_app(pool.clone()).await;
    let message = common::send_message(app, &alice_token, &conversation_id, "original").await;
    let message_id = message["id"].as_str().unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (_, bob_login) = common::post_json(app, "/auth/login", json!({ "email": format!("{bob}@example.com"), "password": "securepassword123" })).await;
    let bob_token = bob_login["data"]["access_token"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (status, body) = common::patch_json_authed(
        app,
        &format!("/conversations/{conversation_id}/messages/{message_id}"),
        &bob_token,
        json!({ "body": "hijacked" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "body: {body}");

    let app = common::create_test_app(pool).await;
    let (status, body) = common::patch_json_authed(
        app,
        &format!("/conversations/{conversation_id}/messages/{message_id}"),
        &alice_token,
        json!({ "body": "edited by owner" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["body"], "edited by owner");
}

#[tokio::test]
async fn delete_message_soft_deletes_and_excludes_from_listing() {
    let pool = common::test_pool().await;
    let (alice_token, conversation_id, _) =
        direct_conversation_between(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    let message = common::send_message(app, &alice_token, &conversation_id, "to be deleted").await;
    let message_id = message["id"].as_str().unwrap().to_owned();

    let app = common::create_test_app(pool.clone()).await;
    let (status, _) = common::delete_authed(app, &format!("/conversations/{conversation_id}/messages/{message_id}"), &alice_token).await;
    assert_eq!(status, StatusCode::OK);

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/conversations/{conversation_id}/messages"), &alice_token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_message_body_is_rejected() {
    let pool = common::test_pool().await;
    let (alice_token, conversation_id, _) =
        direct_conversation_between(&pool, &common::unique_username(), &common::unique_username()).await;

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(
        app,
        &format!("/conversations/{conversation_id}/messages"),
        &alice_token,
        json!({ "body": "" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
}
