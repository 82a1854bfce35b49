use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use parley_api::auth::AppStateInner;
use parley_api::cache::QueryCache;
use parley_api::middleware::Caller;
use parley_db::Database;

fn setup_app() -> Router {
    let state = Arc::new(AppStateInner {
        db: Database::open_in_memory().expect("memory db"),
        jwt_secret: "test-secret".into(),
        token_ttl_days: 1,
        reply_depth: 3,
        search_cache: QueryCache::new(16, Duration::from_secs(60)),
    });
    parley_api::router(state)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Register `username` and return (user id, token).
async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "first_name": username,
            "last_name": "Tester",
            "password": "password123",
            "password_confirm": "password123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

async fn send_message(app: &Router, token: &str, to: &str, content: &str) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/messages",
        Some(token),
        Some(json!({ "receiver_id": to, "content": content })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn health_is_public_and_routes_need_a_token() {
    let app = setup_app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, "GET", "/messages", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authentication required");

    let (status, _) = call(&app, "GET", "/messages", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_and_login() {
    let app = setup_app();
    let (id, _) = register(&app, "alice").await;

    let (status, _) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username": "alice",
            "email": "other@example.com",
            "first_name": "A",
            "last_name": "B",
            "password": "password123",
            "password_confirm": "password123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username": "bob",
            "email": "bob@example.com",
            "first_name": "Bob",
            "last_name": "B",
            "password": "password123",
            "password_confirm": "password124",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "passwords do not match");

    let (status, _) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();

    let (status, me) = call(&app, "GET", "/users/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], id.as_str());
    assert_eq!(me["role"], "guest");
    assert!(me.get("password").is_none());
}

#[tokio::test]
async fn reply_goes_back_to_the_sender() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;
    let (_, carol_token) = register(&app, "carol").await;

    let hi = send_message(&app, &alice_token, &bob, "Hi").await;
    let hi_id = hi["id"].as_str().unwrap();

    let (status, hello) = call(
        &app,
        "POST",
        &format!("/messages/{}/replies", hi_id),
        Some(&bob_token),
        Some(json!({ "content": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hello["thread_level"], 1);
    assert_eq!(hello["receiver_id"], alice.as_str());
    assert_eq!(hello["parent_message"], hi_id);

    let (_, parent) = call(&app, "GET", &format!("/messages/{}", hi_id), Some(&alice_token), None).await;
    assert_eq!(parent["reply_count"], 1);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/messages/{}/replies", hi_id),
        Some(&carol_token),
        Some(json!({ "content": "me too" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, "GET", &format!("/messages/{}", hi_id), Some(&carol_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let hello_id = hello["id"].as_str().unwrap();
    let (status, thread) = call(
        &app,
        "GET",
        &format!("/messages/{}/thread", hello_id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread["id"], hi_id);
    assert_eq!(thread["replies"][0]["content"], "Hello");

    let (_, replies) = call(
        &app,
        "GET",
        &format!("/messages/{}/replies", hi_id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(replies.as_array().unwrap().len(), 1);

    let (_, threads) = call(
        &app,
        "GET",
        &format!("/messages/with/{}", bob),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(threads.as_array().unwrap().len(), 1);
    assert_eq!(threads[0]["replies"][0]["id"], hello_id);
}

#[tokio::test]
async fn only_the_sender_edits_and_history_grows() {
    let app = setup_app();
    let (_, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;

    let message = send_message(&app, &alice_token, &bob, "v1").await;
    let uri = format!("/messages/{}", message["id"].as_str().unwrap());

    let (status, _) = call(&app, "PATCH", &uri, Some(&bob_token), Some(json!({ "content": "hacked" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for content in ["v2", "v3"] {
        let (status, body) =
            call(&app, "PATCH", &uri, Some(&alice_token), Some(json!({ "content": content }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edited"], true);
    }

    let (status, history) = call(&app, "GET", &format!("{}/history", uri), Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["version"], 2);
    assert_eq!(history[0]["old_content"], "v2");
    assert_eq!(history[1]["old_content"], "v1");

    let (status, _) = call(&app, "DELETE", &uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", &uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "GET", &uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notifications_can_be_marked_read() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;

    send_message(&app, &alice_token, &alice, "note to self").await;
    send_message(&app, &alice_token, &bob, "one").await;
    send_message(&app, &alice_token, &bob, "two").await;

    let (_, mine) = call(&app, "GET", "/notifications", Some(&alice_token), None).await;
    assert_eq!(mine["count"], 0);

    let (_, unread) = call(&app, "GET", "/notifications?unread=true", Some(&bob_token), None).await;
    assert_eq!(unread["count"], 2);
    assert_eq!(unread["results"][0]["title"], "New message from alice");
    let first = unread["results"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "POST",
        &format!("/notifications/{}/read", first),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/notifications/{}/read", first),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, marked) = call(&app, "POST", "/notifications/read-all", Some(&bob_token), None).await;
    assert_eq!(marked["updated"], 1);
    let (_, unread) = call(&app, "GET", "/notifications?unread=true", Some(&bob_token), None).await;
    assert_eq!(unread["count"], 0);
}

#[tokio::test]
async fn message_list_is_paginated() {
    let app = setup_app();
    let (_, alice_token) = register(&app, "alice").await;
    let (bob, _) = register(&app, "bob").await;

    for i in 0..25 {
        send_message(&app, &alice_token, &bob, &format!("message {}", i)).await;
    }

    let (status, first) = call(&app, "GET", "/messages", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["count"], 25);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["page_size"], 20);
    assert_eq!(first["next"], "/messages?page=2");
    assert!(first["previous"].is_null());
    assert_eq!(first["results"][0]["content"], "message 24");

    let (_, second) = call(&app, "GET", "/messages?page=2&ordering=timestamp", Some(&alice_token), None).await;
    assert_eq!(second["results"].as_array().unwrap().len(), 5);
    assert_eq!(second["results"][0]["content"], "message 20");
    assert_eq!(second["previous"], "/messages?ordering=timestamp");

    let (status, _) = call(&app, "GET", "/messages?page=3", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        call(&app, "GET", "/messages?page=18446744073709551615", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "invalid page");

    let (_, found) = call(&app, "GET", "/messages?q=message%201", Some(&alice_token), None).await;
    // "message 1" and "message 10".."message 19"
    assert_eq!(found["count"], 11);

    let (status, _) = call(&app, "GET", "/messages?ordering=sideways", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inbox_splits_sent_and_received() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;

    send_message(&app, &alice_token, &bob, "to bob").await;
    send_message(&app, &bob_token, &alice, "to alice").await;
    send_message(&app, &bob_token, &alice, "to alice again").await;

    let (status, inbox) = call(&app, "GET", "/messages/inbox", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox["sent"].as_array().unwrap().len(), 1);
    assert_eq!(inbox["received"].as_array().unwrap().len(), 2);
    assert_eq!(inbox["received"][0]["content"], "to alice again");
}

#[tokio::test]
async fn user_search_and_profiles() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;

    let (status, _) = call(&app, "GET", "/users/search?q=%20", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, found) = call(&app, "GET", "/users/search?q=example", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["username"], "bob");

    let (status, _) = call(&app, "GET", &format!("/users/{}", bob), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "GET", &format!("/users/{}", alice), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, directory) = call(&app, "GET", "/users?name=bo", Some(&alice_token), None).await;
    assert_eq!(directory["count"], 1);

    // Deleting an account invalidates cached searches.
    let (status, _) = call(&app, "DELETE", "/users/me", Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, found) = call(&app, "GET", "/users/search?q=example", Some(&alice_token), None).await;
    assert!(found.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn account_deletion_removes_messages() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;

    let hi = send_message(&app, &alice_token, &bob, "Hi").await;
    call(
        &app,
        "POST",
        &format!("/messages/{}/replies", hi["id"].as_str().unwrap()),
        Some(&bob_token),
        Some(json!({ "content": "Hello" })),
    )
    .await;
    send_message(&app, &bob_token, &alice, "ping").await;

    let (status, report) = call(&app, "DELETE", "/users/me", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["sent_messages"], 1);

    let (_, left) = call(&app, "GET", "/messages", Some(&bob_token), None).await;
    assert_eq!(left["count"], 0);
    let (_, notes) = call(&app, "GET", "/notifications", Some(&bob_token), None).await;
    assert_eq!(notes["count"], 0);

    let (status, _) = call(&app, "GET", "/users/me", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conversations_are_for_participants() {
    let app = setup_app();
    let (alice, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;
    let (carol, carol_token) = register(&app, "carol").await;

    let (status, created) = call(
        &app,
        "POST",
        "/conversations",
        Some(&alice_token),
        Some(json!({ "title": "Weekend", "participant_ids": [bob] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["participants"].as_array().unwrap().len(), 2);
    let uri = format!("/conversations/{}", created["id"].as_str().unwrap());

    let (status, _) = call(
        &app,
        "POST",
        "/conversations",
        Some(&alice_token),
        Some(json!({ "participant_ids": [alice] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send_message(&app, &alice_token, &bob, "saturday?").await;
    send_message(&app, &alice_token, &carol, "unrelated").await;

    let (status, _) = call(&app, "GET", &uri, Some(&carol_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, detail) = call(&app, "GET", &uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["message_count"], 1);
    assert!(detail["last_message_at"].is_string());

    let (status, detail) = call(
        &app,
        "POST",
        &format!("{}/participants", uri),
        Some(&bob_token),
        Some(json!({ "user_id": carol })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["participants"].as_array().unwrap().len(), 3);
    assert_eq!(detail["message_count"], 2);

    let (_, messages) = call(&app, "GET", &format!("{}/messages", uri), Some(&carol_token), None).await;
    assert_eq!(messages["count"], 2);

    let (_, listed) = call(&app, "GET", "/conversations?title=week", Some(&carol_token), None).await;
    assert_eq!(listed["count"], 1);
    let (_, listed) = call(
        &app,
        "GET",
        "/conversations?has_recent_messages=false",
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(listed["count"], 0);
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let app = setup_app();
    let (_, alice_token) = register(&app, "alice").await;
    let (bob, bob_token) = register(&app, "bob").await;
    let sent = send_message(&app, &alice_token, &bob, "hi bob").await;
    let id = sent["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/messages/{}/replies", id),
        Some(&bob_token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("content"), "{}", body);

    let (status, body) = call(&app, "GET", "/messages/not-a-uuid", Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "GET", "/messages?page=two", Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "carol", "nickname": "c" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn caller_is_known_to_the_request_log() {
    let app = setup_app();
    let (_, token) = register(&app, "alice").await;

    let request = Request::builder()
        .uri("/users/me")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let caller = response.extensions().get::<Caller>().expect("caller recorded");
    assert_eq!(caller.0, "alice");

    // Rejected by auth, still passes back through the logger as anonymous.
    let request = Request::builder().uri("/users/me").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.extensions().get::<Caller>().is_none());
}
