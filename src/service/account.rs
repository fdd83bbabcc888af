//! Labels, app tokens and notification settings.

use super::requests::{CreateTokenRequest, CreatedToken, LabelRequest};
use super::{Context, TaskService};
use crate::broadcast::{Event, actions};
use crate::error::{ServiceError, ServiceResult};
use crate::types::{AppToken, Label, NotificationSettings};
use chrono::TimeDelta;
use serde_json::json;

fn label_fields(req: &LabelRequest) -> ServiceResult<(&str, Option<&str>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServiceError::missing_field("name"));
    }
    let color = req.color.as_deref().map(str::trim).filter(|c| !c.is_empty());
    Ok((name, color))
}

impl TaskService {
    pub fn list_labels(&self, user_id: i64) -> ServiceResult<Vec<Label>> {
        Ok(self.db.list_labels(user_id)?)
    }

    pub fn create_label(&self, ctx: &Context, user_id: i64, req: &LabelRequest) -> ServiceResult<Label> {
        ctx.ensure_active()?;
        let (name, color) = label_fields(req)?;
        let label = self.db.create_label(user_id, name, color)?;
        ctx.logger().info(&format!("label {} created", label.id));
        Ok(label)
    }

    /// Rename or recolor a label. Tasks carrying it get a fresh `updated_at`.
    pub fn update_label(
        &self,
        ctx: &Context,
        user_id: i64,
        label_id: i64,
        req: &LabelRequest,
    ) -> ServiceResult<Label> {
        ctx.ensure_active()?;
        let (name, color) = label_fields(req)?;
        Ok(self.db.update_label(user_id, label_id, name, color)?)
    }

    pub fn delete_label(&self, ctx: &Context, user_id: i64, label_id: i64) -> ServiceResult<()> {
        ctx.ensure_active()?;
        self.db.delete_label(user_id, label_id)?;
        ctx.logger().info(&format!("label {} deleted", label_id));
        Ok(())
    }

    pub fn list_app_tokens(&self, user_id: i64) -> ServiceResult<Vec<AppToken>> {
        Ok(self.db.list_app_tokens(user_id)?)
    }

    /// Mint a token. The plaintext is in the result and nowhere else.
    pub async fn create_app_token(
        &self,
        ctx: &Context,
        user_id: i64,
        req: &CreateTokenRequest,
    ) -> ServiceResult<CreatedToken> {
        ctx.ensure_active()?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ServiceError::missing_field("name"));
        }
        let expires_at = match req.expires_in_days {
            None | Some(0) => None,
            Some(days) => Some(self.clock.now() + TimeDelta::days(i64::from(days))),
        };

        let (meta, token) = self
            .db
            .create_app_token(user_id, name, &req.scopes, expires_at)?;
        ctx.logger().info(&format!("app token {} created", meta.id));
        self.emit(ctx, user_id, Event::new(actions::APP_TOKEN_CREATED, &meta))
            .await;
        Ok(CreatedToken { meta, token })
    }

    pub async fn delete_app_token(&self, ctx: &Context, user_id: i64, token_id: i64) -> ServiceResult<()> {
        ctx.ensure_active()?;
        self.db.delete_app_token(user_id, token_id)?;
        ctx.logger().info(&format!("app token {} deleted", token_id));
        self.emit(
            ctx,
            user_id,
            Event::new(actions::APP_TOKEN_DELETED, json!({ "id": token_id })),
        )
        .await;
        Ok(())
    }

    pub fn notification_settings(&self, user_id: i64) -> ServiceResult<NotificationSettings> {
        Ok(self.db.get_notification_settings(user_id)?)
    }

    pub fn update_notification_settings(
        &self,
        ctx: &Context,
        user_id: i64,
        settings: &NotificationSettings,
    ) -> ServiceResult<NotificationSettings> {
        ctx.ensure_active()?;
        let saved = self.db.update_notification_settings(user_id, settings)?;
        ctx.logger().info(&format!(
            "notification provider set to {}",
            saved.provider.as_str()
        ));
        Ok(saved)
    }
}
