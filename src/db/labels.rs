//! Label CRUD. Labels are owned by their creator and may only be attached to
//! that creator's tasks.

use super::users::touch_user;
use super::{Database, from_ms, now_ms, opt_from_ms};
use crate::error::{StoreError, StoreResult};
use crate::types::Label;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub fn parse_label_row(row: &Row) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        created_by: row.get("created_by")?,
        created_at: from_ms(row.get("created_at")?),
        updated_at: opt_from_ms(row.get("updated_at")?),
    })
}

fn get_label_internal(conn: &Connection, label_id: i64) -> StoreResult<Option<Label>> {
    Ok(conn
        .query_row(
            "SELECT * FROM labels WHERE id = ?1",
            params![label_id],
            parse_label_row,
        )
        .optional()?)
}

/// Load a label and check it belongs to `user_id`.
///
/// Labels have visible existence, so a missing label is `NotFound` rather than `Forbidden`.
fn owned_label(conn: &Connection, user_id: i64, label_id: i64) -> StoreResult<Label> {
    let label = get_label_internal(conn, label_id)?.ok_or(StoreError::NotFound)?;
    if label.created_by != user_id {
        return Err(StoreError::Forbidden);
    }
    Ok(label)
}

fn validate_name(name: &str) -> StoreResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Invalid("label name must not be empty".into()));
    }
    Ok(name)
}

/// Bump `updated_at` on every task carrying the label so their ETags change.
fn touch_labelled_tasks(conn: &Connection, label_id: i64, now: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE tasks SET updated_at = ?1
         WHERE id IN (SELECT task_id FROM task_labels WHERE label_id = ?2)",
        params![now, label_id],
    )?;
    Ok(())
}

impl Database {
    pub fn list_labels(&self, user_id: i64) -> StoreResult<Vec<Label>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM labels WHERE created_by = ?1 ORDER BY name, id")?;
            let labels = stmt
                .query_map(params![user_id], parse_label_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(labels)
        })
    }

    pub fn get_label(&self, label_id: i64) -> StoreResult<Label> {
        self.with_conn(|conn| get_label_internal(conn, label_id)?.ok_or(StoreError::NotFound))
    }

    pub fn create_label(&self, user_id: i64, name: &str, color: Option<&str>) -> StoreResult<Label> {
        let name = validate_name(name)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO labels (name, color, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, color, user_id, now_ms()],
            )?;
            let id = conn.last_insert_rowid();
            get_label_internal(conn, id)?.ok_or(StoreError::NotFound)
        })
    }

    pub fn update_label(
        &self,
        user_id: i64,
        label_id: i64,
        name: &str,
        color: Option<&str>,
    ) -> StoreResult<Label> {
        let name = validate_name(name)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            owned_label(&tx, user_id, label_id)?;
            let now = now_ms();
            tx.execute(
                "UPDATE labels SET name = ?1, color = ?2, updated_at = ?3 WHERE id = ?4",
                params![name, color, now, label_id],
            )?;
            touch_labelled_tasks(&tx, label_id, now)?;
            let label = get_label_internal(&tx, label_id)?.ok_or(StoreError::NotFound)?;
            tx.commit()?;
            Ok(label)
        })
    }

    pub fn delete_label(&self, user_id: i64, label_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            owned_label(&tx, user_id, label_id)?;
            let now = now_ms();
            touch_labelled_tasks(&tx, label_id, now)?;
            tx.execute("DELETE FROM labels WHERE id = ?1", params![label_id])?;
            touch_user(&tx, user_id, now)?;
            tx.commit()?;
            Ok(())
        })
    }
}
