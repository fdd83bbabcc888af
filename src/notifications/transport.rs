//! Notification delivery.
//!
//! A user's [`NotificationSettings`] select one [`Transport`] variant; [`Notifier`]
//! owns the shared HTTP client and performs the dispatch with a bounded timeout.

use crate::types::{Notification, NotificationProvider, NotificationSettings};
use bytes::Bytes;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Title used for Gotify messages.
pub const GOTIFY_TITLE: &str = "Task Wizard";
/// Default Gotify priority.
pub const GOTIFY_PRIORITY: u8 = 5;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport misconfigured: {0}")]
    Misconfigured(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivery channel resolved from a user's settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    None,
    Webhook { url: String, method: Method },
    Gotify { url: String, token: String },
}

impl Transport {
    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, TransportError> {
        let url = || {
            settings
                .url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| TransportError::Misconfigured("missing url".into()))
        };
        match settings.provider {
            NotificationProvider::None => Ok(Transport::None),
            NotificationProvider::Webhook => {
                let method = match settings.method.as_deref().map(str::trim) {
                    None | Some("") => Method::POST,
                    Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .map_err(|_| TransportError::Misconfigured(format!("bad method '{}'", m)))?,
                };
                Ok(Transport::Webhook { url: url()?, method })
            }
            NotificationProvider::Gotify => {
                let token = settings
                    .token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| TransportError::Misconfigured("missing gotify token".into()))?;
                Ok(Transport::Gotify { url: url()?, token })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::None => "none",
            Transport::Webhook { .. } => "webhook",
            Transport::Gotify { .. } => "gotify",
        }
    }
}

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Shared outbound HTTP client for all transports.
#[derive(Clone)]
pub struct Notifier {
    client: HttpClient,
    timeout: Duration,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Self {
        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "No native root certificates; using bundled roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https = builder.https_or_http().enable_http1().build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client, timeout }
    }

    /// Deliver one notification. Non-2xx answers and timeouts are failures.
    pub async fn deliver(
        &self,
        transport: &Transport,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let request = match transport {
            Transport::None => return Ok(()),
            Transport::Webhook { url, method } => {
                let body = serde_json::json!({ "message": notification.text });
                json_request(method.clone(), url, &body, None)?
            }
            Transport::Gotify { url, token } => {
                let body = serde_json::json!({
                    "title": GOTIFY_TITLE,
                    "message": notification.text,
                    "priority": GOTIFY_PRIORITY,
                });
                let endpoint = format!("{}/message", url.trim_end_matches('/'));
                json_request(Method::POST, &endpoint, &body, Some(("X-Gotify-Key", token)))?
            }
        };

        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }?;

        debug!(
            notification_id = notification.id,
            transport = transport.name(),
            "Delivered notification"
        );
        Ok(())
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<(), TransportError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map(|c| String::from_utf8_lossy(&c.to_bytes()).into_owned())
            .unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn json_request(
    method: Method,
    url: &str,
    body: &serde_json::Value,
    header: Option<(&str, &str)>,
) -> Result<Request<Full<Bytes>>, TransportError> {
    let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Request(e.to_string()))?;
    let mut builder = Request::builder()
        .method(method)
        .uri(url)
        .header("Content-Type", "application/json")
        .header("User-Agent", concat!("task-wizard/", env!("CARGO_PKG_VERSION")));
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(Bytes::from(bytes)))
        .map_err(|e| TransportError::Misconfigured(e.to_string()))
}
