//! Notification rows: planner writes, pump reads/marks/sweeps.

use super::tasks::parse_task_row;
use super::users::parse_settings_columns;
use super::{Database, from_ms, now_ms, to_ms};
use crate::error::{StoreError, StoreResult};
use crate::types::{NewNotification, Notification, NotificationSettings, Task};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

/// A due notification together with its owner's delivery settings.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub notification: Notification,
    pub settings: NotificationSettings,
}

fn parse_notification_row(row: &Row) -> rusqlite::Result<Notification> {
    let kind: String = row.get("type")?;
    let kind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(Notification {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        text: row.get("text")?,
        kind,
        scheduled_for: from_ms(row.get("scheduled_for")?),
        is_sent: row.get("is_sent")?,
        created_at: from_ms(row.get("created_at")?),
    })
}

fn insert_batch(conn: &Connection, rows: &[NewNotification], now: i64) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO notifications (task_id, user_id, text, type, scheduled_for, is_sent, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
    )?;
    for row in rows {
        stmt.execute(params![
            row.task_id,
            row.user_id,
            row.text,
            row.kind.as_str(),
            to_ms(row.scheduled_for),
            now,
        ])?;
    }
    Ok(())
}

/// Every row must belong to `task_id` and carry the task owner's id.
fn check_rows_belong(conn: &Connection, task_id: i64, rows: &[NewNotification]) -> StoreResult<()> {
    let owner: i64 = conn
        .query_row(
            "SELECT created_by FROM tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::NotFound)?;
    if rows.iter().any(|r| r.task_id != task_id || r.user_id != owner) {
        return Err(StoreError::Invalid(
            "notification owner does not match task owner".into(),
        ));
    }
    Ok(())
}

impl Database {
    /// Delete every notification of the task, then insert `rows`, in one transaction.
    pub fn replace_task_notifications(&self, task_id: i64, rows: &[NewNotification]) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            check_rows_belong(&tx, task_id, rows)?;
            tx.execute("DELETE FROM notifications WHERE task_id = ?1", params![task_id])?;
            insert_batch(&tx, rows, now_ms())?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_task_notifications(&self, task_id: i64) -> StoreResult<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM notifications WHERE task_id = ?1", params![task_id])?)
        })
    }

    pub fn list_task_notifications(&self, task_id: i64) -> StoreResult<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM notifications WHERE task_id = ?1 ORDER BY scheduled_for, id",
            )?;
            let rows = stmt
                .query_map(params![task_id], parse_notification_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Insert rows for possibly many tasks. Each row is checked against its task owner.
    pub fn insert_notifications(&self, rows: &[NewNotification]) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for row in rows {
                check_rows_belong(&tx, row.task_id, std::slice::from_ref(row))?;
            }
            insert_batch(&tx, rows, now_ms())?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Unsent notifications scheduled at or before `now`, with settings preloaded.
    pub fn due_notifications(&self, now: DateTime<Utc>) -> StoreResult<Vec<PendingNotification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.*,
                        s.provider AS s_provider, s.url AS s_url, s.method AS s_method, s.token AS s_token,
                        s.notify_enabled AS s_enabled, s.notify_due_date AS s_due_date,
                        s.notify_pre_due AS s_pre_due, s.notify_overdue AS s_overdue
                 FROM notifications n
                 LEFT JOIN notification_settings s ON s.user_id = n.user_id
                 WHERE n.is_sent = 0 AND n.scheduled_for <= ?1
                 ORDER BY n.user_id, n.scheduled_for, n.id",
            )?;
            let rows = stmt
                .query_map(params![to_ms(now)], |row| {
                    Ok(PendingNotification {
                        notification: parse_notification_row(row)?,
                        settings: parse_settings_columns(
                            row.get("s_provider")?,
                            row.get("s_url")?,
                            row.get("s_method")?,
                            row.get("s_token")?,
                            [
                                row.get("s_enabled")?,
                                row.get("s_due_date")?,
                                row.get("s_pre_due")?,
                                row.get("s_overdue")?,
                            ],
                        ),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Flag rows as delivered in a single statement.
    pub fn mark_notifications_sent(&self, ids: &[i64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "UPDATE notifications SET is_sent = 1 WHERE id IN ({})",
                placeholders
            );
            Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
        })
    }

    /// Delete sent rows scheduled before `before`. Sent overdue rows also have to
    /// be at or before `overdue_before`: until then they still mark their task as
    /// reminded for [`Self::has_overdue_in_window`]. Returns the number removed.
    pub fn sweep_sent_notifications(
        &self,
        before: DateTime<Utc>,
        overdue_before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM notifications
                 WHERE is_sent = 1 AND scheduled_for < ?1
                   AND (type <> 'overdue' OR scheduled_for <= ?2)",
                params![to_ms(before), to_ms(overdue_before)],
            )?)
        })
    }

    /// Active, past-due tasks that want overdue reminders.
    pub fn overdue_candidates(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks
                 WHERE is_active = 1
                   AND next_due_date IS NOT NULL AND next_due_date < ?1
                   AND notify_enabled = 1 AND notify_overdue = 1
                 ORDER BY next_due_date, id",
            )?;
            let tasks = stmt
                .query_map(params![to_ms(now)], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Whether any overdue row (sent or not) is scheduled in `(from, to]`.
    pub fn has_overdue_in_window(
        &self,
        task_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM notifications
                     WHERE task_id = ?1 AND type = 'overdue'
                       AND scheduled_for > ?2 AND scheduled_for <= ?3
                     LIMIT 1",
                    params![task_id, to_ms(from), to_ms(to)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}
