//! Task persistence: CRUD, completion history and ownership checks.

use super::labels::parse_label_row;
use super::users::touch_user;
use super::{Database, from_ms, now_ms, opt_from_ms, opt_to_ms};
use crate::error::{StoreError, StoreResult};
use crate::types::{Frequency, Label, NewTask, NotificationTriggers, Task, TaskHistory};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let frequency_json: String = row.get("frequency")?;
    let frequency: Frequency = serde_json::from_str(&frequency_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
    })?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        created_by: row.get("created_by")?,
        frequency,
        next_due_date: opt_from_ms(row.get("next_due_date")?),
        end_date: opt_from_ms(row.get("end_date")?),
        is_rolling: row.get("is_rolling")?,
        is_active: row.get("is_active")?,
        notification_triggers: NotificationTriggers {
            enabled: row.get("notify_enabled")?,
            due_date: row.get("notify_due_date")?,
            pre_due: row.get("notify_pre_due")?,
            overdue: row.get("notify_overdue")?,
        },
        labels: Vec::new(),
        created_at: from_ms(row.get("created_at")?),
        updated_at: opt_from_ms(row.get("updated_at")?),
    })
}

fn parse_history_row(row: &Row) -> rusqlite::Result<TaskHistory> {
    Ok(TaskHistory {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        completed_date: opt_from_ms(row.get("completed_date")?),
        due_date: opt_from_ms(row.get("due_date")?),
    })
}

/// Fill `labels` for a batch of tasks with one indexed select.
pub(crate) fn attach_labels(conn: &Connection, tasks: &mut [Task]) -> StoreResult<()> {
    if tasks.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; tasks.len()].join(", ");
    let sql = format!(
        "SELECT tl.task_id AS task_id, l.* FROM task_labels tl
         JOIN labels l ON l.id = tl.label_id
         WHERE tl.task_id IN ({})
         ORDER BY l.name, l.id",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(tasks.iter().map(|t| t.id)), |row| {
            Ok((row.get::<_, i64>("task_id")?, parse_label_row(row)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_task: HashMap<i64, Vec<Label>> = HashMap::new();
    for (task_id, label) in rows {
        by_task.entry(task_id).or_default().push(label);
    }
    for task in tasks.iter_mut() {
        task.labels = by_task.remove(&task.id).unwrap_or_default();
    }
    Ok(())
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: i64) -> StoreResult<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    match task {
        Some(task) => {
            let mut tasks = [task];
            attach_labels(conn, &mut tasks)?;
            let [task] = tasks;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

fn query_tasks(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Task>> {
    let mut stmt = conn.prepare(sql)?;
    let mut tasks = stmt
        .query_map(params, parse_task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    attach_labels(conn, &mut tasks)?;
    Ok(tasks)
}

/// Replace a task's label set. Ownership is checked inside the caller's transaction,
/// so a label deleted or reassigned concurrently cannot slip through.
fn sync_task_labels(conn: &Connection, task_id: i64, owner: i64, label_ids: &[i64]) -> StoreResult<()> {
    for &label_id in label_ids {
        let label_owner: Option<i64> = conn
            .query_row(
                "SELECT created_by FROM labels WHERE id = ?1",
                params![label_id],
                |row| row.get(0),
            )
            .optional()?;
        if label_owner != Some(owner) {
            return Err(StoreError::Forbidden);
        }
    }

    conn.execute("DELETE FROM task_labels WHERE task_id = ?1", params![task_id])?;
    for &label_id in label_ids {
        conn.execute(
            "INSERT OR IGNORE INTO task_labels (task_id, label_id) VALUES (?1, ?2)",
            params![task_id, label_id],
        )?;
    }
    Ok(())
}

fn validate_title(title: &str) -> StoreResult<()> {
    if title.trim().is_empty() {
        return Err(StoreError::Invalid("title must not be empty".into()));
    }
    Ok(())
}

impl Database {
    /// Create a new task and assign its labels. Returns the assigned id.
    pub fn create_task(&self, new: &NewTask) -> StoreResult<i64> {
        validate_title(&new.title)?;
        let frequency_json = serde_json::to_string(&new.frequency)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO tasks (
                    title, created_by, frequency, next_due_date, end_date, is_rolling, is_active,
                    notify_enabled, notify_due_date, notify_pre_due, notify_overdue, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new.title,
                    new.created_by,
                    frequency_json,
                    opt_to_ms(new.next_due_date),
                    opt_to_ms(new.end_date),
                    new.is_rolling,
                    new.notification_triggers.enabled,
                    new.notification_triggers.due_date,
                    new.notification_triggers.pre_due,
                    new.notification_triggers.overdue,
                    now_ms(),
                ],
            )?;
            let task_id = tx.last_insert_rowid();

            sync_task_labels(&tx, task_id, new.created_by, &new.label_ids)?;

            tx.commit()?;
            Ok(task_id)
        })
    }

    /// Overwrite an existing task row (and its label set) with `task`.
    ///
    /// `created_by` and `created_at` are never changed; `updated_at` is stamped.
    pub fn upsert_task(&self, task: &Task) -> StoreResult<()> {
        self.upsert_task_with_labels(task, &task.label_ids())
    }

    /// Like [`Database::upsert_task`], assigning `label_ids` instead of `task.labels`.
    pub fn upsert_task_with_labels(&self, task: &Task, label_ids: &[i64]) -> StoreResult<()> {
        validate_title(&task.title)?;
        if !task.is_active && task.next_due_date.is_some() {
            return Err(StoreError::Invalid(
                "an inactive task cannot have a due date".into(),
            ));
        }
        let frequency_json = serde_json::to_string(&task.frequency)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let owner: i64 = tx
                .query_row(
                    "SELECT created_by FROM tasks WHERE id = ?1",
                    params![task.id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound)?;

            tx.execute(
                "UPDATE tasks SET
                    title = ?1, frequency = ?2, next_due_date = ?3, end_date = ?4,
                    is_rolling = ?5, is_active = ?6,
                    notify_enabled = ?7, notify_due_date = ?8, notify_pre_due = ?9, notify_overdue = ?10,
                    updated_at = ?11
                 WHERE id = ?12",
                params![
                    task.title,
                    frequency_json,
                    opt_to_ms(task.next_due_date),
                    opt_to_ms(task.end_date),
                    task.is_rolling,
                    task.is_active,
                    task.notification_triggers.enabled,
                    task.notification_triggers.due_date,
                    task.notification_triggers.pre_due,
                    task.notification_triggers.overdue,
                    now_ms(),
                    task.id,
                ],
            )?;

            sync_task_labels(&tx, task.id, owner, label_ids)?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Get a task by id with its labels preloaded.
    pub fn get_task(&self, task_id: i64) -> StoreResult<Task> {
        self.with_conn(|conn| get_task_internal(conn, task_id)?.ok_or(StoreError::NotFound))
    }

    /// Get a task on behalf of `user_id`.
    ///
    /// Missing tasks and tasks owned by someone else both yield `Forbidden`, so
    /// callers cannot test for the existence of other users' tasks.
    pub fn get_task_for(&self, user_id: i64, task_id: i64) -> StoreResult<Task> {
        self.with_conn(|conn| match get_task_internal(conn, task_id)? {
            Some(task) if task.created_by == user_id => Ok(task),
            _ => Err(StoreError::Forbidden),
        })
    }

    /// Ok when `user_id` owns the task; `Forbidden` otherwise (including when it does not exist).
    pub fn is_task_owner(&self, task_id: i64, user_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row(
                    "SELECT created_by FROM tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?;
            if owner == Some(user_id) {
                Ok(())
            } else {
                Err(StoreError::Forbidden)
            }
        })
    }

    /// Active tasks ordered by due date ascending, undated tasks last.
    pub fn list_active_tasks(&self, user_id: i64) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            query_tasks(
                conn,
                "SELECT * FROM tasks
                 WHERE created_by = ?1 AND is_active = 1
                 ORDER BY next_due_date IS NULL, next_due_date ASC, id ASC",
                params![user_id],
            )
        })
    }

    /// Inactive tasks, most recently completed first.
    pub fn list_completed_tasks(&self, user_id: i64, limit: u32, offset: u32) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            query_tasks(
                conn,
                "SELECT * FROM tasks
                 WHERE created_by = ?1 AND is_active = 0
                 ORDER BY COALESCE(updated_at, created_at) DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
                params![user_id, limit, offset],
            )
        })
    }

    /// Record a completion (or a skip when `completed_at` is `None`) and move the
    /// task to `next_due`. A `None` next due date deactivates the task.
    ///
    /// The history row captures the due date stored at the moment of the write.
    pub fn complete_task(
        &self,
        task_id: i64,
        next_due: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let current_due: Option<i64> = tx
                .query_row(
                    "SELECT next_due_date FROM tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound)?;

            let now = now_ms();
            tx.execute(
                "INSERT INTO task_histories (task_id, completed_date, due_date, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_id, opt_to_ms(completed_at), current_due, now],
            )?;

            let next_due = opt_to_ms(next_due);
            tx.execute(
                "UPDATE tasks SET
                    next_due_date = ?1,
                    is_active = CASE WHEN ?1 IS NULL THEN 0 ELSE is_active END,
                    updated_at = ?2
                 WHERE id = ?3",
                params![next_due, now, task_id],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Undo the most recent completion or skip: pop the newest history row and
    /// restore its due date, reactivating the task.
    pub fn uncomplete_task(&self, task_id: i64) -> StoreResult<TaskHistory> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
                params![task_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound);
            }

            let popped = tx
                .query_row(
                    "SELECT * FROM task_histories WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
                    params![task_id],
                    parse_history_row,
                )
                .optional()?
                .ok_or(StoreError::NoHistory)?;

            tx.execute(
                "DELETE FROM task_histories WHERE id = ?1",
                params![popped.id],
            )?;
            tx.execute(
                "UPDATE tasks SET next_due_date = ?1, is_active = 1, updated_at = ?2 WHERE id = ?3",
                params![opt_to_ms(popped.due_date), now_ms(), task_id],
            )?;

            tx.commit()?;
            Ok(popped)
        })
    }

    /// Delete a task. History, labels links and notifications cascade.
    pub fn delete_task(&self, task_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner: i64 = tx
                .query_row(
                    "SELECT created_by FROM tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound)?;
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            touch_user(&tx, owner, now_ms())?;
            tx.commit()?;
            Ok(())
        })
    }

    /// History rows for a task, newest due date first.
    pub fn task_history(&self, task_id: i64) -> StoreResult<Vec<TaskHistory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM task_histories WHERE task_id = ?1
                 ORDER BY due_date DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(params![task_id], parse_history_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Latest modification across the user's tasks and labels (and deletions of either).
    pub fn last_modified(&self, user_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let ms: Option<i64> = conn.query_row(
                "SELECT MAX(ts) FROM (
                    SELECT MAX(COALESCE(updated_at, created_at)) AS ts FROM tasks WHERE created_by = ?1
                    UNION ALL
                    SELECT MAX(COALESCE(updated_at, created_at)) FROM labels WHERE created_by = ?1
                    UNION ALL
                    SELECT modified_at FROM users WHERE id = ?1
                 )",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(opt_from_ms(ms))
        })
    }
}
