//! JSON API under `/api/v1`.

use super::{AppState, AuthUser};
use crate::error::{ServiceError, ServiceResult};
use crate::service::requests::{
    CreateTaskRequest, CreateTokenRequest, LabelRequest, Page, UpdateDueDateRequest,
    UpdateTaskRequest,
};
use crate::types::NotificationSettings;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task).put(update_task))
        .route("/tasks/completed", get(list_completed))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/do", post(complete_task))
        .route("/tasks/{id}/skip", post(skip_task))
        .route("/tasks/{id}/undo", post(uncomplete_task))
        .route("/tasks/{id}/dueDate", put(update_due_date))
        .route("/tasks/{id}/history", get(task_history))
        .route("/labels", get(list_labels).post(create_label))
        .route("/labels/{id}", put(update_label).delete(delete_label))
        .route("/tokens", get(list_tokens).post(create_token))
        .route("/tokens/{id}", axum::routing::delete(delete_token))
        .route(
            "/notifications/settings",
            get(get_settings).put(update_settings),
        )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `Json` whose rejections are 400 `INVALID_FIELD_VALUE` on `body` instead of
/// axum's 415/422.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(body_error(rejection)),
        }
    }
}

fn body_error(rejection: JsonRejection) -> ServiceError {
    ServiceError::invalid_value("body", rejection.body_text())
}

fn created<T: serde::Serialize>(body: T) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

// Tasks

async fn list_tasks(State(state): State<AppState>, auth: AuthUser) -> ServiceResult<Response> {
    let tasks = state.service.list_active(auth.user_id)?;
    Ok(Json(tasks).into_response())
}

async fn list_completed(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<Page>,
) -> ServiceResult<Response> {
    let tasks = state.service.list_completed(auth.user_id, page)?;
    Ok(Json(tasks).into_response())
}

async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<Response> {
    Ok(Json(state.service.get(auth.user_id, id)?).into_response())
}

async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(req): JsonBody<CreateTaskRequest>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.create_task");
    let task = state.service.create(&ctx, auth.user_id, req).await?;
    Ok(created(json!({ "id": task.id })))
}

async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(req): JsonBody<UpdateTaskRequest>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.update_task");
    state.service.update(&ctx, auth.user_id, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.delete_task");
    state.service.delete(&ctx, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.complete_task");
    Ok(Json(state.service.complete(&ctx, auth.user_id, id).await?).into_response())
}

async fn skip_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.skip_task");
    Ok(Json(state.service.skip(&ctx, auth.user_id, id).await?).into_response())
}

async fn uncomplete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.uncomplete_task");
    Ok(Json(state.service.uncomplete(&ctx, auth.user_id, id).await?).into_response())
}

async fn update_due_date(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<UpdateDueDateRequest>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.update_due_date");
    state
        .service
        .update_due_date(&ctx, auth.user_id, id, req.due_date.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn task_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<Response> {
    Ok(Json(state.service.history(auth.user_id, id)?).into_response())
}

// Labels

async fn list_labels(State(state): State<AppState>, auth: AuthUser) -> ServiceResult<Response> {
    Ok(Json(state.service.list_labels(auth.user_id)?).into_response())
}

async fn create_label(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(req): JsonBody<LabelRequest>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.create_label");
    Ok(created(state.service.create_label(&ctx, auth.user_id, &req)?))
}

async fn update_label(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<LabelRequest>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.update_label");
    state.service.update_label(&ctx, auth.user_id, id, &req)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_label(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.delete_label");
    state.service.delete_label(&ctx, auth.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// App tokens

async fn list_tokens(State(state): State<AppState>, auth: AuthUser) -> ServiceResult<Response> {
    Ok(Json(state.service.list_app_tokens(auth.user_id)?).into_response())
}

async fn create_token(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(req): JsonBody<CreateTokenRequest>,
) -> ServiceResult<Response> {
    let ctx = state.context("api.create_token");
    Ok(created(
        state
            .service
            .create_app_token(&ctx, auth.user_id, &req)
            .await?,
    ))
}

async fn delete_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.delete_token");
    state.service.delete_app_token(&ctx, auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Notification settings

async fn get_settings(State(state): State<AppState>, auth: AuthUser) -> ServiceResult<Response> {
    Ok(Json(state.service.notification_settings(auth.user_id)?).into_response())
}

async fn update_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(settings): JsonBody<NotificationSettings>,
) -> ServiceResult<StatusCode> {
    let ctx = state.context("api.update_settings");
    state
        .service
        .update_notification_settings(&ctx, auth.user_id, &settings)?;
    Ok(StatusCode::NO_CONTENT)
}
