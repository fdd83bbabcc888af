//! CalDAV projection of a user's active tasks.
//!
//! One collection, `/dav/tasks/`, holds one VTODO per active task at
//! `/dav/tasks/{id}.ics`. Clients may read everything but only write the
//! title and due date; the write goes through the task service so
//! notifications and live events follow.

pub mod vtodo;
pub mod xml;

use crate::error::{ServiceError, ServiceResult};
use crate::server::auth::AuthRejection;
use crate::server::{AppState, AuthUser};
use crate::types::Task;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tracing::debug;
use xml::{ICS_CONTENT_TYPE, Multistatus, XML_CONTENT_TYPE};

const DISPLAY_NAME: &str = "Tasks";
const DAV_CAPABILITIES: &str = "1, 3, calendar-access";
const COLLECTION_METHODS: &str = "OPTIONS, HEAD, PROPFIND, REPORT";
const ITEM_METHODS: &str = "OPTIONS, HEAD, GET, PROPFIND, PUT";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", any(root))
        .route("/dav/tasks", any(collection))
        .route("/dav/tasks/", any(collection))
        .route("/dav/tasks/{file}", any(item))
}

fn multistatus(body: String) -> Response {
    (
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, XML_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

fn options(allow: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::ALLOW, allow),
            (header::HeaderName::from_static("dav"), DAV_CAPABILITIES),
        ],
    )
        .into_response()
}

fn not_allowed(allow: &'static str) -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, allow)]).into_response()
}

fn etag_header(task: &Task) -> Option<HeaderValue> {
    HeaderValue::from_str(&vtodo::etag(task)).ok()
}

/// Clients query the root; PROPFIND and REPORT there are served as the collection.
async fn root(
    State(state): State<AppState>,
    auth: Result<AuthUser, AuthRejection>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    match method.as_str() {
        "PROPFIND" | "REPORT" => match auth {
            Ok(user) => collection(State(state), user, method, headers, body).await,
            Err(rejection) => rejection.into_response(),
        },
        "OPTIONS" => options(COLLECTION_METHODS),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn collection(
    State(state): State<AppState>,
    auth: AuthUser,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let result = match method.as_str() {
        "PROPFIND" => propfind_collection(&state, auth, &headers),
        "REPORT" => report(&state, auth, &body),
        "HEAD" => Ok(StatusCode::OK.into_response()),
        "OPTIONS" => Ok(options(COLLECTION_METHODS)),
        _ => Ok(not_allowed(COLLECTION_METHODS)),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

fn propfind_collection(state: &AppState, auth: AuthUser, headers: &HeaderMap) -> ServiceResult<Response> {
    let db = state.service.db();
    let ctag = xml::ctag(db.last_modified(auth.user_id)?);

    let mut doc = Multistatus::new();
    doc.collection(DISPLAY_NAME, &ctag);

    let depth = headers
        .get("depth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1");
    if depth.trim() != "0" {
        for task in state.service.list_active(auth.user_id)? {
            let ics = vtodo::render(&task);
            doc.item(&xml::item_href(task.id), &vtodo::etag(&task), ics.len());
        }
    }
    Ok(multistatus(doc.finish()))
}

/// `calendar-multiget` returns the named tasks; any other report returns them all.
fn report(state: &AppState, auth: AuthUser, body: &str) -> ServiceResult<Response> {
    let mut doc = Multistatus::new();

    if xml::is_multiget(body) {
        for href in xml::hrefs(body) {
            let Some(id) = xml::task_id_from_href(&href) else {
                doc.status(&href, StatusCode::NOT_FOUND);
                continue;
            };
            match state.service.get(auth.user_id, id) {
                Ok(task) if task.is_active => {
                    doc.calendar_data(&href, &vtodo::etag(&task), &vtodo::render(&task));
                }
                Ok(_) => {
                    doc.status(&href, StatusCode::NOT_FOUND);
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    doc.status(&href, e.status_code());
                }
            }
        }
    } else {
        for task in state.service.list_active(auth.user_id)? {
            doc.calendar_data(
                &xml::item_href(task.id),
                &vtodo::etag(&task),
                &vtodo::render(&task),
            );
        }
    }
    Ok(multistatus(doc.finish()))
}

async fn item(
    State(state): State<AppState>,
    auth: AuthUser,
    method: Method,
    Path(file): Path<String>,
    body: String,
) -> Response {
    let Some(task_id) = xml::task_id_from_file(&file) else {
        return ServiceError::not_found("calendar object").into_response();
    };
    let result = match method.as_str() {
        "GET" => get_item(&state, auth, task_id, true),
        "HEAD" => get_item(&state, auth, task_id, false),
        "PROPFIND" => propfind_item(&state, auth, task_id),
        "PUT" => put_item(&state, auth, task_id, &body).await,
        "OPTIONS" => Ok(options(ITEM_METHODS)),
        _ => Ok(not_allowed(ITEM_METHODS)),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

fn get_item(state: &AppState, auth: AuthUser, task_id: i64, with_body: bool) -> ServiceResult<Response> {
    let task = state.service.get(auth.user_id, task_id)?;
    let ics = vtodo::render(&task);
    let mut response = if with_body {
        Response::new(Body::from(ics))
    } else {
        Response::new(Body::empty())
    };
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ICS_CONTENT_TYPE));
    if let Some(etag) = etag_header(&task) {
        headers.insert(header::ETAG, etag);
    }
    Ok(response)
}

fn propfind_item(state: &AppState, auth: AuthUser, task_id: i64) -> ServiceResult<Response> {
    let task = state.service.get(auth.user_id, task_id)?;
    let ics = vtodo::render(&task);
    let mut doc = Multistatus::new();
    doc.item(&xml::item_href(task.id), &vtodo::etag(&task), ics.len());
    Ok(multistatus(doc.finish()))
}

async fn put_item(state: &AppState, auth: AuthUser, task_id: i64, body: &str) -> ServiceResult<Response> {
    let update = vtodo::parse(body)
        .map_err(|e| ServiceError::invalid_value("body", e.to_string()))?;
    let ctx = state.context("caldav.put");
    debug!(task_id, has_due = update.due.is_some(), "CalDAV PUT");

    let task = state
        .service
        .apply_calendar_update(&ctx, auth.user_id, task_id, update.summary, update.due)
        .await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(etag) = etag_header(&task) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}
