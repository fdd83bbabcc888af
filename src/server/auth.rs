//! Token authentication.
//!
//! Accepted forms:
//! - `Authorization: Bearer tw_...` (API and WebSocket clients)
//! - `Authorization: Basic base64(username:tw_...)` (CalDAV clients); the username
//!   must be the token owner's
//! - `?token=tw_...` on the WebSocket upgrade only, since browsers cannot set headers there

use super::AppState;
use crate::error::{ErrorCode, ServiceError, StoreResult};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error};

pub const REALM: &str = "Task Wizard";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

/// 401 with a Basic challenge so CalDAV clients prompt for credentials.
#[derive(Debug)]
pub struct AuthRejection(ServiceError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let unauthorized = self.0.status_code() == StatusCode::UNAUTHORIZED;
        let mut response = self.0.into_response();
        if !unauthorized {
            return response;
        }
        let challenge = format!("Basic realm=\"{}\", charset=\"UTF-8\"", REALM);
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Parsed `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Basic { username: String, token: String },
}

impl Credentials {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(' ')?;
        let rest = rest.trim();
        if scheme.eq_ignore_ascii_case("bearer") {
            return (!rest.is_empty()).then(|| Credentials::Bearer(rest.to_string()));
        }
        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(rest).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, token) = decoded.split_once(':')?;
            return Some(Credentials::Basic {
                username: username.to_string(),
                token: token.to_string(),
            });
        }
        None
    }
}

fn check(state: &AppState, credentials: &Credentials) -> StoreResult<Option<i64>> {
    let db = state.service.db();
    let now = state.service.now();
    match credentials {
        Credentials::Bearer(token) => db.authenticate_token(token, now),
        Credentials::Basic { username, token } => {
            let Some(user_id) = db.authenticate_token(token, now)? else {
                return Ok(None);
            };
            let user = db.get_user(user_id)?;
            Ok((user.username == *username).then_some(user_id))
        }
    }
}

/// Resolve credentials to a user, mapping every failure other than a store error to 401.
pub fn resolve(state: &AppState, credentials: Option<Credentials>) -> Result<AuthUser, ServiceError> {
    let Some(credentials) = credentials else {
        return Err(ServiceError::unauthorized());
    };
    match check(state, &credentials) {
        Ok(Some(user_id)) => Ok(AuthUser { user_id }),
        Ok(None) => {
            debug!("Rejected credentials");
            Err(ServiceError::new(ErrorCode::Unauthorized, "invalid or expired token"))
        }
        Err(e) => {
            error!(error = %e, "Token lookup failed");
            Err(ServiceError::from(e))
        }
    }
}

pub fn header_credentials(headers: &HeaderMap) -> Option<Credentials> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credentials::parse)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(state, header_credentials(&parts.headers)).map_err(AuthRejection)
    }
}
