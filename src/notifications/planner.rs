//! Materializes a task's notification schedule.

use crate::db::Database;
use crate::error::StoreResult;
use crate::types::{NewNotification, NotificationType, Task};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

/// Hours after the due date at which overdue reminders are planned.
pub const OVERDUE_OFFSETS_HOURS: [i64; 3] = [24, 48, 72];

pub fn due_text(title: &str) -> String {
    format!("📅 *{}* is due today", title)
}

pub fn pre_due_text(title: &str, due: DateTime<Utc>) -> String {
    format!(
        "📢 *{}* is coming up on {}",
        title,
        due.format("%a %b %-d at %H:%M UTC")
    )
}

pub fn overdue_text(title: &str) -> String {
    format!("🚨 *{}* is overdue", title)
}

/// Rows a task should have, given its current state. Empty when notifications are
/// disabled or the task has no due date.
pub fn plan(task: &Task, pre_due_offset: TimeDelta) -> Vec<NewNotification> {
    let triggers = &task.notification_triggers;
    let Some(due) = task.next_due_date else {
        return Vec::new();
    };
    if !triggers.enabled || !task.is_active {
        return Vec::new();
    }

    let row = |kind, text: String, at| NewNotification {
        task_id: task.id,
        user_id: task.created_by,
        text,
        kind,
        scheduled_for: at,
    };

    let mut rows = Vec::with_capacity(5);
    if triggers.due_date {
        rows.push(row(NotificationType::DueDate, due_text(&task.title), due));
    }
    if triggers.pre_due {
        rows.push(row(
            NotificationType::PreDue,
            pre_due_text(&task.title, due),
            due - pre_due_offset,
        ));
    }
    if triggers.overdue {
        for hours in OVERDUE_OFFSETS_HOURS {
            rows.push(row(
                NotificationType::Overdue,
                overdue_text(&task.title),
                due + TimeDelta::hours(hours),
            ));
        }
    }
    rows
}

/// Wipes and rebuilds notification rows for one task.
#[derive(Clone)]
pub struct Planner {
    db: Database,
    pre_due_offset: TimeDelta,
}

impl Planner {
    pub fn new(db: Database, pre_due_offset: TimeDelta) -> Self {
        Self { db, pre_due_offset }
    }

    /// Delete every notification of the task (sent or not) and insert the fresh plan.
    /// Returns the number of rows inserted.
    pub fn rebuild(&self, task: &Task) -> StoreResult<usize> {
        let rows = plan(task, self.pre_due_offset);
        self.db.replace_task_notifications(task.id, &rows)?;
        debug!(task_id = task.id, count = rows.len(), "Rebuilt notifications");
        Ok(rows.len())
    }
}
