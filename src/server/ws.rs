//! `/api/ws`: request/response frames plus pushed events on one socket.
//!
//! Request `{requestId?, action, data}`, response `{requestId?, action, status, data}`.
//! Events from [`crate::broadcast::ConnectionHub`] share the response envelope
//! without `requestId`.

use super::auth::{Credentials, header_credentials, resolve};
use super::{AppState, AuthUser};
use crate::broadcast::CONNECTION_QUEUE;
use crate::error::{ServiceError, ServiceResult};
use crate::service::requests::{
    CreateTaskRequest, CreateTokenRequest, LabelRequest, Page, UpdateTaskRequest,
};
use crate::types::NotificationSettings;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsRequest {
    #[serde(default)]
    pub request_id: Option<Value>,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub action: String,
    pub status: u16,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct IdParam {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DueDateParam {
    id: i64,
    #[serde(default)]
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelUpdate {
    id: i64,
    #[serde(flatten)]
    label: LabelRequest,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credentials = header_credentials(&headers).or_else(|| params.token.map(Credentials::Bearer));
    let user = match resolve(&state, credentials) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (conn_id, mut events) = state.hub.register(user.user_id);
    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut replies) = mpsc::channel::<String>(CONNECTION_QUEUE);

    // Stops once the hub drops this socket or a send fails.
    let mut writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = replies.recv() => frame,
                frame = events.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                else => break,
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_frame(&state, user, text.as_str()).await;
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(user_id = user.user_id, error = %e, "WebSocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => break,
            _ = &mut writer => break,
        }
    }

    state.hub.unregister(user.user_id, conn_id);
    drop(reply_tx);
    writer.abort();
    debug!(user_id = user.user_id, connection_id = conn_id, "WebSocket closed");
}

/// Decode one text frame, run it and encode the response.
pub async fn handle_frame(state: &AppState, user: AuthUser, text: &str) -> String {
    let response = match serde_json::from_str::<WsRequest>(text) {
        Ok(req) => {
            let request_id = req.request_id.clone();
            let action = req.action.clone();
            let (status, data) = match dispatch(state, user, req).await {
                Ok(ok) => ok,
                Err(e) => {
                    if e.is_internal() {
                        warn!(action = %action, error = %e, "WebSocket request failed");
                    }
                    (e.status_code(), e.public_body())
                }
            };
            WsResponse {
                request_id,
                action,
                status: status.as_u16(),
                data,
            }
        }
        Err(e) => {
            let err = ServiceError::invalid_value("frame", format!("malformed frame: {}", e));
            WsResponse {
                request_id: None,
                action: "error".to_string(),
                status: err.status_code().as_u16(),
                data: err.public_body(),
            }
        }
    };
    serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"action":"error","status":500,"data":{"code":"INTERNAL_ERROR","message":"internal server error"}}"#
            .to_string()
    })
}

fn params<T: DeserializeOwned>(data: Value) -> ServiceResult<T> {
    let data = if data.is_null() { json!({}) } else { data };
    serde_json::from_value(data)
        .map_err(|e| ServiceError::invalid_value("data", format!("invalid data: {}", e)))
}

fn ok<T: Serialize>(value: T) -> ServiceResult<(StatusCode, Value)> {
    serde_json::to_value(value)
        .map(|v| (StatusCode::OK, v))
        .map_err(ServiceError::internal)
}

fn created<T: Serialize>(value: T) -> ServiceResult<(StatusCode, Value)> {
    ok(value).map(|(_, v)| (StatusCode::CREATED, v))
}

fn no_content() -> ServiceResult<(StatusCode, Value)> {
    Ok((StatusCode::NO_CONTENT, Value::Null))
}

async fn dispatch(state: &AppState, user: AuthUser, req: WsRequest) -> ServiceResult<(StatusCode, Value)> {
    let svc = &state.service;
    let uid = user.user_id;
    let ctx = state.context(&format!("ws.{}", req.action));

    match req.action.as_str() {
        "get_tasks" => ok(svc.list_active(uid)?),
        "get_completed_tasks" => ok(svc.list_completed(uid, params::<Page>(req.data)?)?),
        "get_task" => ok(svc.get(uid, params::<IdParam>(req.data)?.id)?),
        "create_task" => {
            let task = svc
                .create(&ctx, uid, params::<CreateTaskRequest>(req.data)?)
                .await?;
            created(task)
        }
        "update_task" => ok(svc
            .update(&ctx, uid, params::<UpdateTaskRequest>(req.data)?)
            .await?),
        "delete_task" => {
            svc.delete(&ctx, uid, params::<IdParam>(req.data)?.id).await?;
            no_content()
        }
        "skip_task" => ok(svc.skip(&ctx, uid, params::<IdParam>(req.data)?.id).await?),
        "update_due_date" => {
            let p = params::<DueDateParam>(req.data)?;
            ok(svc
                .update_due_date(&ctx, uid, p.id, p.due_date.as_deref())
                .await?)
        }
        "complete_task" => ok(svc.complete(&ctx, uid, params::<IdParam>(req.data)?.id).await?),
        "uncomplete_task" => ok(svc
            .uncomplete(&ctx, uid, params::<IdParam>(req.data)?.id)
            .await?),
        "get_task_history" => ok(svc.history(uid, params::<IdParam>(req.data)?.id)?),
        "get_user_labels" => ok(svc.list_labels(uid)?),
        "create_label" => created(svc.create_label(&ctx, uid, &params::<LabelRequest>(req.data)?)?),
        "update_label" => {
            let p = params::<LabelUpdate>(req.data)?;
            ok(svc.update_label(&ctx, uid, p.id, &p.label)?)
        }
        "delete_label" => {
            svc.delete_label(&ctx, uid, params::<IdParam>(req.data)?.id)?;
            no_content()
        }
        "get_app_tokens" => ok(svc.list_app_tokens(uid)?),
        "create_app_token" => created(
            svc.create_app_token(&ctx, uid, &params::<CreateTokenRequest>(req.data)?)
                .await?,
        ),
        "delete_app_token" => {
            svc.delete_app_token(&ctx, uid, params::<IdParam>(req.data)?.id)
                .await?;
            no_content()
        }
        "update_notification_settings" => ok(svc.update_notification_settings(
            &ctx,
            uid,
            &params::<NotificationSettings>(req.data)?,
        )?),
        other => Err(ServiceError::invalid_value(
            "action",
            format!("unknown action: {}", other),
        )),
    }
}
