use super::*;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tasklive_core::{MemoryStore, TaskId};
use tokio::sync::broadcast::error::TryRecvError;
use tower::ServiceExt;

const ORIGIN: &str = "http://localhost:5173";

fn test_app(policy: EmissionPolicy) -> (Router, Broadcaster, watch::Sender<bool>) {
    let store = MemoryStore::new();
    let broadcaster = Broadcaster::new(16);
    let (tx, rx) = watch::channel(false);
    let state = AppState::new(
        Arc::new(store),
        broadcaster.clone(),
        policy,
        vec![HeaderValue::from_static(ORIGIN)],
        rx,
    );
    (create_router(state), broadcaster, tx)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn create(app: &Router, body: Value) -> String {
    let (status, result) = send(app, "POST", "/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    result["insertedId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_liveness() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("tasklive is running"));
}

#[tokio::test]
async fn test_create_and_list_by_owner() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let (status, result) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({"name": "buy milk", "email": "a@x.com", "category": "todo"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["acknowledged"], json!(true));
    let id = result["insertedId"].as_str().unwrap().to_string();
    create(&app, json!({"name": "other", "email": "b@x.com"})).await;
    create(&app, json!({"name": "nobody"})).await;

    let (status, tasks) = send(&app, "GET", "/tasks?email=a%40x.com", None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["_id"], json!(id));
    assert_eq!(tasks[0]["name"], json!("buy milk"));
    assert!(tasks[0]["timeStamp"].is_string());

    let (_, unowned) = send(&app, "GET", "/tasks", None).await;
    assert_eq!(unowned.as_array().unwrap().len(), 1);
    assert_eq!(unowned[0]["name"], json!("nobody"));
}

#[tokio::test]
async fn test_update_category() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let id = create(&app, json!({"name": "n", "email": "a@x.com", "category": "todo"})).await;

    let (status, result) = send(
        &app,
        "PUT",
        &format!("/tasks/{}", id),
        Some(json!({"category": "done", "name": "ignored"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["matchedCount"], json!(1));
    assert_eq!(result["modifiedCount"], json!(1));

    let (_, tasks) = send(&app, "GET", "/tasks?email=a%40x.com", None).await;
    assert_eq!(tasks[0]["category"], json!("done"));
    assert_eq!(tasks[0]["name"], json!("n"));

    let (_, cleared) = send(&app, "PUT", &format!("/tasks/{}", id), Some(json!({}))).await;
    assert_eq!(cleared["modifiedCount"], json!(1));
    let (_, tasks) = send(&app, "GET", "/tasks?email=a%40x.com", None).await;
    assert_eq!(tasks[0]["category"], Value::Null);
}

#[tokio::test]
async fn test_update_category_unknown_id_matches_nothing() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let (status, result) = send(
        &app,
        "PUT",
        &format!("/tasks/{}", TaskId::new()),
        Some(json!({"category": "done"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["matchedCount"], json!(0));
}

#[tokio::test]
async fn test_update_details() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let id = create(&app, json!({"name": "n", "description": "d", "email": "a@x.com"})).await;

    let (status, result) = send(
        &app,
        "PUT",
        &format!("/task/{}", id),
        Some(json!({"name": "renamed", "email": "evil@x.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["modifiedCount"], json!(1));

    let (_, tasks) = send(&app, "GET", "/tasks?email=a%40x.com", None).await;
    assert_eq!(tasks[0]["name"], json!("renamed"));
    assert_eq!(tasks[0]["description"], json!("d"));

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/task/{}", TaskId::new()),
        Some(json!({"name": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], json!(404));
}

#[tokio::test]
async fn test_malformed_id_is_bad_request() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    for (method, uri, body) in [
        ("DELETE", "/tasks/not-an-id", None),
        ("PUT", "/tasks/not-an-id", Some(json!({"category": "x"}))),
        ("PUT", "/task/not-an-id", Some(json!({"name": "x"}))),
    ] {
        let (status, body) = send(&app, method, uri, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert_eq!(body["status"], json!(400));
    }
}

#[tokio::test]
async fn test_delete_twice() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let id = create(&app, json!({"email": "a@x.com"})).await;

    let (status, first) = send(&app, "DELETE", &format!("/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["deletedCount"], json!(1));

    let (status, second) = send(&app, "DELETE", &format!("/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deletedCount"], json!(0));
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let (app, _, _tx) = test_app(EmissionPolicy::Feed);
    let request = Request::builder()
        .uri("/tasks")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri("/tasks")
        .header(header::ORIGIN, ORIGIN)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        ORIGIN
    );
}

#[tokio::test]
async fn test_feed_policy_handlers_stay_silent() {
    let (app, broadcaster, _tx) = test_app(EmissionPolicy::Feed);
    let mut rx = broadcaster.subscribe();
    create(&app, json!({"email": "a@x.com"})).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_dual_policy_handlers_announce() {
    let (app, broadcaster, _tx) = test_app(EmissionPolicy::Dual);
    let mut rx = broadcaster.subscribe();

    let id = create(&app, json!({"name": "n", "email": "a@x.com"})).await;
    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.event, "taskAdded");
    assert_eq!(frame.data["id"], json!(id));
    assert_eq!(frame.data["name"], json!("n"));

    send(&app, "PUT", &format!("/tasks/{}", id), Some(json!({"category": "done"}))).await;
    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.event, "taskUpdated");
    assert_eq!(frame.data["updatedTask"], json!({"category": "done"}));

    // Deletes and detail edits are left to the change feed.
    send(&app, "PUT", &format!("/task/{}", id), Some(json!({"name": "m"}))).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    let (_, deleted) = send(&app, "DELETE", &format!("/tasks/{}", id), None).await;
    assert_eq!(deleted["deletedCount"], json!(1));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_dual_policy_handler_frame_can_overtake_lagging_feed() {
    let store = MemoryStore::with_limits(100, Duration::from_millis(20));
    let broadcaster = Broadcaster::new(16);
    let (tx, shutdown) = watch::channel(false);
    let state = AppState::new(
        Arc::new(store.clone()),
        broadcaster.clone(),
        EmissionPolicy::Dual,
        vec![HeaderValue::from_static(ORIGIN)],
        shutdown.clone(),
    );
    let app = create_router(state);
    let mut rx = broadcaster.subscribe();

    let id = create(&app, json!({"name": "n"})).await;
    assert_eq!(rx.try_recv().unwrap().event, "taskAdded");

    // Feed opened at head but not yet running.
    let listener = ChangeFeedListener::open("lagging", Arc::new(store), broadcaster.clone())
        .await
        .unwrap();
    send(&app, "PUT", &format!("/task/{}", id), Some(json!({"name": "m"}))).await;
    send(&app, "PUT", &format!("/tasks/{}", id), Some(json!({"category": "done"}))).await;

    let handle = tokio::spawn(listener.run(shutdown));
    let mut delivered = Vec::new();
    while let Ok(Ok(frame)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
        delivered.push(frame.data["updatedTask"].clone());
    }

    // Each change arrives once; the handler's frame is not held back behind
    // the earlier feed-only commit.
    assert_eq!(delivered, vec![json!({"category": "done"}), json!({"name": "m"})]);

    tx.send(true).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_origin_headers_trim_trailing_slash() {
    let config = ServerConfig {
        allowed_origins: vec!["http://localhost:5173/".into(), "https://app.example".into()],
        ..ServerConfig::default()
    };
    let headers = config.origin_headers().unwrap();
    assert_eq!(headers[0], "http://localhost:5173");
    assert_eq!(headers[1], "https://app.example");
}
