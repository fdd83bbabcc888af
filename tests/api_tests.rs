//! Integration tests for the JSON API and the WebSocket frame protocol.

use bytes::Bytes;
use chrono::TimeDelta;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::{Value, json};
use std::sync::Arc;
use task_wizard::broadcast::ConnectionHub;
use task_wizard::clock::SystemClock;
use task_wizard::config::ServerConfig;
use task_wizard::db::Database;
use task_wizard::notifications::Planner;
use task_wizard::server::ws::handle_frame;
use task_wizard::server::{self, AppState, AuthUser};
use task_wizard::service::TaskService;
use tokio::sync::watch;

struct Fixture {
    state: AppState,
    _stop: watch::Sender<bool>,
    alice: AuthUser,
    bob: AuthUser,
    alice_token: String,
}

fn fixture() -> Fixture {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let alice = db.create_user("alice").unwrap().id;
    let bob = db.create_user("bob").unwrap().id;
    let (_, alice_token) = db.create_app_token(alice, "api", &[], None).unwrap();

    let hub = Arc::new(ConnectionHub::new());
    let service = Arc::new(TaskService::new(
        db.clone(),
        Planner::new(db, TimeDelta::hours(3)),
        hub.clone(),
        Arc::new(SystemClock),
    ));
    let (stop, stop_rx) = watch::channel(false);
    Fixture {
        state: AppState::new(service, hub, stop_rx),
        _stop: stop,
        alice: AuthUser { user_id: alice },
        bob: AuthUser { user_id: bob },
        alice_token,
    }
}

async fn frame(fx: &Fixture, user: AuthUser, request: Value) -> Value {
    let reply = handle_frame(&fx.state, user, &request.to_string()).await;
    serde_json::from_str(&reply).expect("response is JSON")
}

// ============================================================================
// WebSocket frames
// ============================================================================

#[tokio::test]
async fn ws_create_complete_and_history() {
    let fx = fixture();

    let created = frame(
        &fx,
        fx.alice,
        json!({
            "requestId": "r1",
            "action": "create_task",
            "data": {
                "title": "Laundry",
                "frequency": {"type": "weekly"},
                "next_due_date": "2024-03-15T10:00:00Z"
            }
        }),
    )
    .await;
    assert_eq!(created["requestId"], "r1");
    assert_eq!(created["action"], "create_task");
    assert_eq!(created["status"], 201);
    let id = created["data"]["id"].as_i64().unwrap();

    let done = frame(
        &fx,
        fx.alice,
        json!({"requestId": 2, "action": "complete_task", "data": {"id": id}}),
    )
    .await;
    assert_eq!(done["status"], 200);
    assert_eq!(done["requestId"], 2);
    assert_eq!(done["data"]["next_due_date"], "2024-03-22T10:00:00Z");

    let history = frame(
        &fx,
        fx.alice,
        json!({"action": "get_task_history", "data": {"id": id}}),
    )
    .await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
    assert!(history.get("requestId").is_none());

    let list = frame(&fx, fx.alice, json!({"action": "get_tasks"})).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let deleted = frame(
        &fx,
        fx.alice,
        json!({"action": "delete_task", "data": {"id": id}}),
    )
    .await;
    assert_eq!(deleted["status"], 204);
    assert!(deleted["data"].is_null());
}

#[tokio::test]
async fn ws_errors_use_the_response_envelope() {
    let fx = fixture();

    let malformed = frame(&fx, fx.alice, json!({"data": {}})).await;
    assert_eq!(malformed["action"], "error");
    assert_eq!(malformed["status"], 400);

    let reply = handle_frame(&fx.state, fx.alice, "{not json").await;
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["status"], 400);

    let unknown = frame(&fx, fx.alice, json!({"requestId": 9, "action": "fly"})).await;
    assert_eq!(unknown["status"], 400);
    assert_eq!(unknown["requestId"], 9);
    assert_eq!(unknown["data"]["code"], "INVALID_FIELD_VALUE");

    let bad_frequency = frame(
        &fx,
        fx.alice,
        json!({
            "action": "create_task",
            "data": {"title": "x", "frequency": {"type": "custom"}}
        }),
    )
    .await;
    assert_eq!(bad_frequency["status"], 400);
    assert_eq!(bad_frequency["data"]["code"], "BAD_FREQUENCY");
}

#[tokio::test]
async fn ws_foreign_tasks_are_forbidden() {
    let fx = fixture();
    let created = frame(
        &fx,
        fx.alice,
        json!({"action": "create_task", "data": {"title": "Mine"}}),
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();

    for action in ["get_task", "complete_task", "skip_task", "delete_task"] {
        let reply = frame(&fx, fx.bob, json!({"action": action, "data": {"id": id}})).await;
        assert_eq!(reply["status"], 403, "{}", action);
    }
}

#[tokio::test]
async fn ws_labels_tokens_and_settings() {
    let fx = fixture();

    let label = frame(
        &fx,
        fx.alice,
        json!({"action": "create_label", "data": {"name": "home", "color": "#ff0000"}}),
    )
    .await;
    assert_eq!(label["status"], 201);
    let label_id = label["data"]["id"].as_i64().unwrap();

    let renamed = frame(
        &fx,
        fx.alice,
        json!({"action": "update_label", "data": {"id": label_id, "name": "house"}}),
    )
    .await;
    assert_eq!(renamed["data"]["name"], "house");

    let labels = frame(&fx, fx.alice, json!({"action": "get_user_labels"})).await;
    assert_eq!(labels["data"].as_array().unwrap().len(), 1);

    let token = frame(
        &fx,
        fx.alice,
        json!({"action": "create_app_token", "data": {"name": "phone", "expires_in_days": 30}}),
    )
    .await;
    assert_eq!(token["status"], 201);
    assert!(token["data"]["token"].as_str().unwrap().starts_with("tw_"));
    assert!(token["data"]["expires_at"].is_string());

    let tokens = frame(&fx, fx.alice, json!({"action": "get_app_tokens"})).await;
    let tokens = tokens["data"].as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(|t| t.get("token").is_none()));

    let settings = frame(
        &fx,
        fx.alice,
        json!({
            "action": "update_notification_settings",
            "data": {"provider": "webhook", "url": "http://localhost:9/hook"}
        }),
    )
    .await;
    assert_eq!(settings["status"], 200);
    assert_eq!(settings["data"]["provider"], "webhook");

    let invalid = frame(
        &fx,
        fx.alice,
        json!({"action": "update_notification_settings", "data": {"provider": "gotify", "url": "http://x"}}),
    )
    .await;
    assert_eq!(invalid["status"], 400);
}

// ============================================================================
// JSON API over HTTP
// ============================================================================

async fn call(
    client: &Client<HttpConnector, Full<Bytes>>,
    method: Method,
    url: String,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(url);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let payload = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Bytes::from(body.to_string())
        }
        None => Bytes::new(),
    };
    let response = client
        .request(builder.body(Full::new(payload)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn rest_task_round_trip() {
    let fx = fixture();
    let token = fx.alice_token.clone();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let handle = server::start_server(fx.state.clone(), &config).await.unwrap();
    let base = format!("http://{}/api/v1", handle.local_addr());
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    let (status, body) = call(&client, Method::GET, format!("{}/health", base), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = call(&client, Method::GET, format!("{}/tasks", base), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &client,
        Method::POST,
        format!("{}/tasks", base),
        Some(&token),
        Some(json!({"title": "Dentist", "next_due_date": "2024-05-01T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        &client,
        Method::PUT,
        format!("{}/tasks/{}/dueDate", base, id),
        Some(&token),
        Some(json!({"due_date": "2024-05-02T08:00:00+01:00"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "due_date");

    let (status, body) = call(
        &client,
        Method::PUT,
        format!("{}/tasks/{}/dueDate", base, id),
        Some(&token),
        Some(json!({"due_date": "2024-05-02T08:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, _) = call(
        &client,
        Method::PUT,
        format!("{}/tasks", base),
        Some(&token),
        Some(json!({
            "id": id,
            "title": "Dentist (cleaning)",
            "next_due_date": "2024-05-02T08:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(
        &client,
        Method::GET,
        format!("{}/tasks/{}", base, id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Dentist (cleaning)");
    assert_eq!(body["next_due_date"], "2024-05-02T08:00:00Z");

    let (status, body) = call(
        &client,
        Method::POST,
        format!("{}/tasks/{}/do", base, id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, body) = call(
        &client,
        Method::GET,
        format!("{}/tasks/completed?limit=10", base),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = call(
        &client,
        Method::DELETE,
        format!("{}/tasks/{}", base, id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &client,
        Method::GET,
        format!("{}/tasks/{}", base, id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    handle.shutdown().await;
}

#[tokio::test]
async fn rest_rejects_bodies_of_the_wrong_shape() {
    let fx = fixture();
    let token = fx.alice_token.clone();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let handle = server::start_server(fx.state.clone(), &config).await.unwrap();
    let base = format!("http://{}/api/v1", handle.local_addr());
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    for payload in [
        json!({"title": "x", "frequency": {"type": "hourly"}}),
        json!({"title": 5}),
        json!([1, 2, 3]),
    ] {
        let (status, body) = call(
            &client,
            Method::POST,
            format!("{}/tasks", base),
            Some(&token),
            Some(payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
        assert_eq!(body["code"], "INVALID_FIELD_VALUE");
        assert_eq!(body["field"], "body");
    }

    let (status, _) = call(
        &client,
        Method::POST,
        format!("{}/labels", base),
        Some(&token),
        Some(json!({"name": ["home"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &client,
        Method::POST,
        format!("{}/labels", base),
        Some(&token),
        Some(json!({"name": "home"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let label_id = body["id"].as_i64().unwrap();

    let (status, _) = call(
        &client,
        Method::PUT,
        format!("{}/labels/{}", base, label_id),
        Some(&token),
        Some(json!({"name": "house"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(
        &client,
        Method::GET,
        format!("{}/labels", base),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "house");

    handle.shutdown().await;
}
