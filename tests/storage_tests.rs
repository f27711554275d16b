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
async fn upload_then_confirm_then_download_round_trip() {
    let pool = common::test_pool().await;
    let token = authed_token(&pool, &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    let (status, issued) = common::post_json_authed(
        app,
        "/uploads",
        &token,
        json!({ "filename": "avatar.png", "content_type": "image/png" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {issued}");
    let file_id = issued["data"]["file_id"].as_str().unwrap().to_owned();
    let upload_url = issued["data"]["upload_url"].as_str().unwrap().to_owned();

    // Simulate the client's PUT to the pre-signed URL by writing straight to
    // the local blob root the upload URL points at.
    let object_key = upload_url.rsplit("/uploads/").next().unwrap();
    let path = common::test_upload_dir().join(object_key);
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"fake png bytes").await.unwrap();

    let app = common::create_test_app(pool.clone()).await;
    let (status, confirmed) = common::post_json_authed(app, &format!("/uploads/{file_id}/confirm"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK, "body: {confirmed}");
    assert_eq!(confirmed["data"]["size_bytes"], 14);

    let app = common::create_test_app(pool).await;
    let (status, download) = common::get_authed(app, &format!("/files/{file_id}/download-url"), &token).await;
    assert_eq!(status, StatusCode::OK, "body: {download}");
    assert!(download["data"]["download_url"].is_string());
}

#[tokio::test]
async fn download_url_rejected_before_confirmation() {
    let pool = common::test_pool().await;
    let token = authed_token(&pool, &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, issued) = common::post_json_authed(
        app,
        "/uploads",
        &token,
        json!({ "filename": "draft.txt", "content_type": "text/plain" }),
    )
    .await;
    let file_id = issued["data"]["file_id"].as_str().unwrap();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::get_authed(app, &format!("/files/{file_id}/download-url"), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "body: {body}");
}

#[tokio::test]
async fn confirm_upload_rejects_non_owner() {
    let pool = common::test_pool().await;
    let owner_token = authed_token(&pool, &common::unique_username()).await;
    let other_token = authed_token(&pool, &common::unique_username()).await;

    let app = common::create_test_app(pool.clone()).await;
    let (_, issued) = common::post_json_authed(
        app,
        "/uploads",
        &owner_token,
        json!({ "filename": "secret.txt", "content_type": "text/plain" }),
    )
    .await;
    let file_id = issued["data"]["file_id"].as_str().unwrap();

    let app = common::create_test_app(pool).await;
    let (status, body) = common::post_json_authed(app, &format!("/uploads/{file_id}/confirm"), &other_token, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "body: {body}");
}
