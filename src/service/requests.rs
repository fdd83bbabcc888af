//! Request payloads shared by the REST and WebSocket surfaces.
//!
//! Dates travel as RFC3339 strings and must be in UTC.

use crate::error::{ServiceError, ServiceResult};
use crate::types::{Frequency, NotificationTriggers};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for completed-task listings.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Parse an RFC3339 timestamp, rejecting any non-zero UTC offset.
pub fn parse_utc(field: &str, raw: &str) -> ServiceResult<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| {
        ServiceError::invalid_value(field, format!("{} must be an RFC3339 timestamp: {}", field, e))
    })?;
    if parsed.offset().local_minus_utc() != 0 {
        return Err(ServiceError::invalid_value(
            field,
            format!("{} must be in UTC", field),
        ));
    }
    Ok(parsed.with_timezone(&Utc))
}

pub fn parse_utc_opt(field: &str, raw: Option<&str>) -> ServiceResult<Option<DateTime<Utc>>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_utc(field, s).map(Some),
    }
}

fn require_title(title: &str) -> ServiceResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::missing_field("title"));
    }
    Ok(title.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub next_due_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_rolling: bool,
    /// Falls back to the user's notification settings when absent.
    #[serde(default)]
    pub notification_triggers: Option<NotificationTriggers>,
    #[serde(default)]
    pub labels: Vec<i64>,
}

impl CreateTaskRequest {
    pub fn title(&self) -> ServiceResult<String> {
        require_title(&self.title)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub next_due_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_rolling: bool,
    /// Keeps the stored triggers when absent.
    #[serde(default)]
    pub notification_triggers: Option<NotificationTriggers>,
    #[serde(default)]
    pub labels: Vec<i64>,
}

impl UpdateTaskRequest {
    pub fn title(&self) -> ServiceResult<String> {
        require_title(&self.title)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDueDateRequest {
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// A freshly minted token. `token` is the only time the plaintext is shown.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedToken {
    #[serde(flatten)]
    pub meta: crate::types::AppToken,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn utc_timestamps_parse() {
        assert_eq!(
            parse_utc("next_due_date", "2024-03-15T10:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
        );
        assert!(parse_utc("next_due_date", "2024-03-15T10:00:00+00:00").is_ok());
    }

    #[test]
    fn non_utc_and_garbage_rejected() {
        let err = parse_utc("next_due_date", "2024-03-15T10:00:00+02:00").unwrap_err();
        assert_eq!(err.field.as_deref(), Some("next_due_date"));
        assert!(parse_utc("end_date", "tomorrow").is_err());
        assert_eq!(parse_utc_opt("end_date", Some("  ")).unwrap(), None);
    }

    #[test]
    fn create_request_defaults() {
        let req: CreateTaskRequest = serde_json::from_value(json!({"title": "  Trash  "})).unwrap();
        assert_eq!(req.title().unwrap(), "Trash");
        assert_eq!(req.frequency, Frequency::once());
        assert!(req.notification_triggers.is_none());
        assert!(req.labels.is_empty());

        let blank: CreateTaskRequest = serde_json::from_value(json!({})).unwrap();
        assert!(blank.title().is_err());
    }

    #[test]
    fn page_is_clamped() {
        let page = Page {
            limit: Some(100_000),
            offset: None,
        };
        assert_eq!(page.limit(), MAX_PAGE_SIZE);
        assert_eq!(Page::default().limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
    }
}
