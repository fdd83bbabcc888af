//! Core types for the Task Wizard server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user account. Authentication details live in `app_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Top-level recurrence kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyType {
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

/// Sub-mode of a `custom` frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyOn {
    Interval,
    DaysOfTheWeek,
    DayOfTheMonths,
}

/// Unit for `custom`/`interval` frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

/// Structured recurrence descriptor as stored on a task and sent over the wire.
///
/// The descriptor is deliberately loose: combinations are validated by
/// [`crate::recurrence::Schedule::try_from`], which reports `BadFrequency`
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    #[serde(rename = "type", default)]
    pub kind: FrequencyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<FrequencyOn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<IntervalUnit>,
    /// Weekday indexes, 0 = Sunday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<u8>,
    /// Month indexes, 0 = January.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub months: Vec<u8>,
    /// Optional wall-clock time ("HH:MM", UTC) applied to custom frequencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl Frequency {
    pub fn once() -> Self {
        Self::default()
    }

    pub fn of(kind: FrequencyType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Per-task notification switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTriggers {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub due_date: bool,
    #[serde(default)]
    pub pre_due: bool,
    #[serde(default)]
    pub overdue: bool,
}

impl NotificationTriggers {
    pub const fn all() -> Self {
        Self {
            enabled: true,
            due_date: true,
            pre_due: true,
            overdue: true,
        }
    }

    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            due_date: false,
            pre_due: false,
            overdue: false,
        }
    }
}

impl Default for NotificationTriggers {
    fn default() -> Self {
        Self::all()
    }
}

/// A label owned by a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A recurring or one-shot task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub created_by: i64,
    pub frequency: Frequency,
    pub next_due_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_rolling: bool,
    pub is_active: bool,
    pub notification_triggers: NotificationTriggers,
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Logical modification instant: `updated_at`, or `created_at` for untouched rows.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn label_ids(&self) -> Vec<i64> {
        self.labels.iter().map(|l| l.id).collect()
    }
}

/// Input for creating a task (a `Task` minus the store-assigned fields).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub created_by: i64,
    pub frequency: Frequency,
    pub next_due_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_rolling: bool,
    pub notification_triggers: NotificationTriggers,
    pub label_ids: Vec<i64>,
}

/// Append-only completion/skip record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    /// `None` records a skip.
    pub completed_date: Option<DateTime<Utc>>,
    /// Due date in effect when the event happened.
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DueDate,
    PreDue,
    Overdue,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DueDate => "due_date",
            NotificationType::PreDue => "pre_due",
            NotificationType::Overdue => "overdue",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "due_date" => Ok(NotificationType::DueDate),
            "pre_due" => Ok(NotificationType::PreDue),
            "overdue" => Ok(NotificationType::Overdue),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

/// A planned notification row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub scheduled_for: DateTime<Utc>,
    pub is_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification row before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub task_id: i64,
    pub user_id: i64,
    pub text: String,
    pub kind: NotificationType,
    pub scheduled_for: DateTime<Utc>,
}

/// Delivery channel for a user's notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationProvider {
    #[default]
    None,
    Webhook,
    Gotify,
}

impl NotificationProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationProvider::None => "none",
            NotificationProvider::Webhook => "webhook",
            NotificationProvider::Gotify => "gotify",
        }
    }
}

impl FromStr for NotificationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(NotificationProvider::None),
            "webhook" => Ok(NotificationProvider::Webhook),
            "gotify" => Ok(NotificationProvider::Gotify),
            other => Err(format!("unknown notification provider: {}", other)),
        }
    }
}

/// Per-user notification delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub provider: NotificationProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Defaults applied to tasks created without explicit triggers.
    #[serde(default)]
    pub triggers: NotificationTriggers,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            provider: NotificationProvider::None,
            url: None,
            method: None,
            token: None,
            triggers: NotificationTriggers::all(),
        }
    }
}

/// An API token (the plaintext is never stored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frequency_defaults_to_once() {
        let freq: Frequency = serde_json::from_value(json!({})).unwrap();
        assert_eq!(freq.kind, FrequencyType::Once);
        assert_eq!(freq, Frequency::once());
    }

    #[test]
    fn frequency_wire_names() {
        let freq: Frequency = serde_json::from_value(json!({
            "type": "custom",
            "on": "days_of_the_week",
            "days": [1, 3, 5]
        }))
        .unwrap();
        assert_eq!(freq.kind, FrequencyType::Custom);
        assert_eq!(freq.on, Some(FrequencyOn::DaysOfTheWeek));
        assert_eq!(freq.days, vec![1, 3, 5]);

        let value = serde_json::to_value(Frequency::of(FrequencyType::Weekly)).unwrap();
        assert_eq!(value, json!({"type": "weekly"}));
    }

    #[test]
    fn notification_type_parses_its_own_names() {
        for kind in [
            NotificationType::DueDate,
            NotificationType::PreDue,
            NotificationType::Overdue,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationType>(), Ok(kind));
        }
        assert!("later".parse::<NotificationType>().is_err());
    }
}
