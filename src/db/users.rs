//! Users, per-user notification settings and app tokens.

use super::{Database, from_ms, now_ms, opt_from_ms, opt_to_ms, to_ms};
use crate::error::{StoreError, StoreResult};
use crate::types::{AppToken, NotificationProvider, NotificationSettings, NotificationTriggers, User};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix that makes leaked tokens easy to grep for.
pub const TOKEN_PREFIX: &str = "tw_";

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        created_at: from_ms(row.get("created_at")?),
    })
}

fn parse_token_row(row: &Row) -> rusqlite::Result<AppToken> {
    let scopes_json: String = row.get("scopes")?;
    Ok(AppToken {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
        expires_at: opt_from_ms(row.get("expires_at")?),
        created_at: from_ms(row.get("created_at")?),
    })
}

pub(crate) fn parse_settings_columns(
    provider: Option<String>,
    url: Option<String>,
    method: Option<String>,
    token: Option<String>,
    triggers: [Option<bool>; 4],
) -> NotificationSettings {
    let defaults = NotificationSettings::default();
    let [enabled, due_date, pre_due, overdue] = triggers;
    NotificationSettings {
        provider: provider
            .and_then(|p| p.parse::<NotificationProvider>().ok())
            .unwrap_or(defaults.provider),
        url,
        method,
        token,
        triggers: NotificationTriggers {
            enabled: enabled.unwrap_or(defaults.triggers.enabled),
            due_date: due_date.unwrap_or(defaults.triggers.due_date),
            pre_due: pre_due.unwrap_or(defaults.triggers.pre_due),
            overdue: overdue.unwrap_or(defaults.triggers.overdue),
        },
    }
}

/// Bump the user's deletion watermark (part of the CalDAV CTag).
pub(crate) fn touch_user(conn: &Connection, user_id: i64, now: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE users SET modified_at = ?1 WHERE id = ?2",
        params![now, user_id],
    )?;
    Ok(())
}

/// Hex-encoded SHA-256 of a token's plaintext.
pub fn hash_token(plaintext: &str) -> String {
    format!("{:x}", Sha256::digest(plaintext.as_bytes()))
}

impl Database {
    pub fn create_user(&self, username: &str) -> StoreResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::Invalid("username must not be empty".into()));
        }
        self.with_conn(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                params![username],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::Invalid(format!("username '{}' is taken", username)));
            }
            conn.execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                params![username, now_ms()],
            )?;
            let id = conn.last_insert_rowid();
            Ok(conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], parse_user_row)?)
        })
    }

    pub fn get_user(&self, user_id: i64) -> StoreResult<User> {
        self.with_conn(|conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?1", params![user_id], parse_user_row)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
    }

    pub fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM users WHERE username = ?1",
                    params![username],
                    parse_user_row,
                )
                .optional()?)
        })
    }

    /// Settings for a user, or the defaults when none were saved.
    pub fn get_notification_settings(&self, user_id: i64) -> StoreResult<NotificationSettings> {
        self.with_conn(|conn| {
            let settings = conn
                .query_row(
                    "SELECT provider, url, method, token,
                            notify_enabled, notify_due_date, notify_pre_due, notify_overdue
                     FROM notification_settings WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(parse_settings_columns(
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
                        ))
                    },
                )
                .optional()?;
            Ok(settings.unwrap_or_default())
        })
    }

    pub fn update_notification_settings(
        &self,
        user_id: i64,
        settings: &NotificationSettings,
    ) -> StoreResult<NotificationSettings> {
        if settings.provider != NotificationProvider::None
            && settings.url.as_deref().is_none_or(|u| u.trim().is_empty())
        {
            return Err(StoreError::Invalid(format!(
                "provider '{}' requires a url",
                settings.provider.as_str()
            )));
        }
        if settings.provider == NotificationProvider::Gotify
            && settings.token.as_deref().is_none_or(|t| t.is_empty())
        {
            return Err(StoreError::Invalid("provider 'gotify' requires a token".into()));
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notification_settings (
                    user_id, provider, url, method, token,
                    notify_enabled, notify_due_date, notify_pre_due, notify_overdue, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id) DO UPDATE SET
                    provider = excluded.provider,
                    url = excluded.url,
                    method = excluded.method,
                    token = excluded.token,
                    notify_enabled = excluded.notify_enabled,
                    notify_due_date = excluded.notify_due_date,
                    notify_pre_due = excluded.notify_pre_due,
                    notify_overdue = excluded.notify_overdue,
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    settings.provider.as_str(),
                    settings.url,
                    settings.method,
                    settings.token,
                    settings.triggers.enabled,
                    settings.triggers.due_date,
                    settings.triggers.pre_due,
                    settings.triggers.overdue,
                    now_ms(),
                ],
            )?;
            Ok(())
        })?;
        self.get_notification_settings(user_id)
    }

    /// Mint a token for `user_id`. The plaintext is returned once and never stored.
    pub fn create_app_token(
        &self,
        user_id: i64,
        name: &str,
        scopes: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<(AppToken, String)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("token name must not be empty".into()));
        }
        let plaintext = format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple());
        let scopes_json = serde_json::to_string(scopes)?;

        let token = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_tokens (user_id, name, token_hash, scopes, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user_id,
                    name,
                    hash_token(&plaintext),
                    scopes_json,
                    opt_to_ms(expires_at),
                    now_ms()
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(conn.query_row(
                "SELECT * FROM app_tokens WHERE id = ?1",
                params![id],
                parse_token_row,
            )?)
        })?;

        Ok((token, plaintext))
    }

    pub fn list_app_tokens(&self, user_id: i64) -> StoreResult<Vec<AppToken>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM app_tokens WHERE user_id = ?1 ORDER BY created_at DESC, id DESC")?;
            let tokens = stmt
                .query_map(params![user_id], parse_token_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tokens)
        })
    }

    pub fn delete_app_token(&self, user_id: i64, token_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row(
                    "SELECT user_id FROM app_tokens WHERE id = ?1",
                    params![token_id],
                    |row| row.get(0),
                )
                .optional()?;
            match owner {
                None => Err(StoreError::NotFound),
                Some(owner) if owner != user_id => Err(StoreError::Forbidden),
                Some(_) => {
                    conn.execute("DELETE FROM app_tokens WHERE id = ?1", params![token_id])?;
                    Ok(())
                }
            }
        })
    }

    /// Resolve a plaintext token to its user id. Expired or unknown tokens yield `None`.
    pub fn authenticate_token(&self, plaintext: &str, now: DateTime<Utc>) -> StoreResult<Option<i64>> {
        let hash = hash_token(plaintext);
        self.with_conn(|conn| {
            let row: Option<(i64, Option<i64>)> = conn
                .query_row(
                    "SELECT user_id, expires_at FROM app_tokens WHERE token_hash = ?1",
                    params![hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.and_then(|(user_id, expires_at)| match expires_at {
                Some(exp) if exp <= to_ms(now) => None,
                _ => Some(user_id),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_token("tw_abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("tw_abc"));
        assert_ne!(h, hash_token("tw_abd"));
    }

    #[test]
    fn token_roundtrip_and_expiry() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice").unwrap();
        let now = Utc::now();

        let (_, live) = db
            .create_app_token(user.id, "phone", &["task:read".to_string()], None)
            .unwrap();
        assert!(live.starts_with(TOKEN_PREFIX));
        assert_eq!(db.authenticate_token(&live, now).unwrap(), Some(user.id));

        let (_, expired) = db
            .create_app_token(user.id, "old", &[], Some(now - TimeDelta::hours(1)))
            .unwrap();
        assert_eq!(db.authenticate_token(&expired, now).unwrap(), None);
        assert_eq!(db.authenticate_token("tw_nope", now).unwrap(), None);
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("bob").unwrap();
        assert!(matches!(db.create_user("bob"), Err(StoreError::Invalid(_))));
        assert!(matches!(db.create_user("  "), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn settings_default_then_update() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("carol").unwrap();
        assert_eq!(
            db.get_notification_settings(user.id).unwrap(),
            NotificationSettings::default()
        );

        let missing_url = NotificationSettings {
            provider: NotificationProvider::Webhook,
            ..NotificationSettings::default()
        };
        assert!(db.update_notification_settings(user.id, &missing_url).is_err());

        let webhook = NotificationSettings {
            provider: NotificationProvider::Webhook,
            url: Some("http://example.test/hook".into()),
            method: Some("PUT".into()),
            ..NotificationSettings::default()
        };
        let saved = db.update_notification_settings(user.id, &webhook).unwrap();
        assert_eq!(saved, webhook);
    }
}
