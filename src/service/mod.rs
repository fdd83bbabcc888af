//! Task service: the single entry point for task mutations.
//!
//! Every mutation follows the same shape: ownership check, recurrence math,
//! one store transaction, then (after commit) a detached notification rebuild
//! and a broadcast event. Neither of the post-commit steps can fail the request.

mod account;
pub mod requests;

use crate::broadcast::{Broadcaster, Event, actions};
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::logging::Logger;
use crate::notifications::Planner;
use crate::recurrence;
use crate::types::{NewTask, Task, TaskHistory};
use chrono::{DateTime, Utc};
use requests::{CreateTaskRequest, Page, UpdateTaskRequest, parse_utc_opt};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use requests::CreatedToken;

/// Per-request state: a logger and an optional cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    logger: Logger,
    cancel: Option<watch::Receiver<bool>>,
}

impl Context {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            cancel: None,
        }
    }

    /// Context for background work with only a named logger.
    pub fn background(name: &str) -> Self {
        Self::new(Logger::new().with_name(name))
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Copy that keeps the logger but outlives the request's cancellation.
    pub fn detached(&self) -> Self {
        Self::new(self.logger.clone())
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn ensure_active(&self) -> ServiceResult<()> {
        if self.is_cancelled() {
            return Err(ServiceError::cancelled());
        }
        Ok(())
    }
}

pub struct TaskService {
    db: Database,
    planner: Planner,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    rebuilds: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskService {
    pub fn new(
        db: Database,
        planner: Planner,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            planner,
            broadcaster,
            clock,
            rebuilds: Mutex::new(Vec::new()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Rebuild the task's notifications on the runtime without waiting for it.
    ///
    /// The planner reloads the task when it runs, so overlapping rebuilds
    /// converge on the latest committed state.
    fn spawn_rebuild(&self, ctx: &Context, task_id: i64) {
        let planner = self.planner.clone();
        let db = self.db.clone();
        let ctx = ctx.detached();
        let handle = tokio::spawn(async move {
            let result = match db.get_task(task_id) {
                Ok(task) => planner.rebuild(&task).map(Some),
                Err(crate::error::StoreError::NotFound) => Ok(None),
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(count)) => ctx
                    .logger()
                    .debug(&format!("task {}: {} notifications planned", task_id, count)),
                Ok(None) => ctx
                    .logger()
                    .debug(&format!("task {} is gone; nothing to plan", task_id)),
                Err(e) => ctx.logger().error(&format!(
                    "task {}: notification rebuild failed: {}",
                    task_id, e
                )),
            }
        });

        let mut pending = self.rebuilds.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every rebuild spawned so far.
    pub async fn flush_rebuilds(&self) {
        let handles = std::mem::take(&mut *self.rebuilds.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Notification rebuild task panicked");
            }
        }
    }

    async fn emit(&self, ctx: &Context, user_id: i64, event: Event) {
        let action = event.action;
        if let Err(e) = self.broadcaster.broadcast(user_id, event).await {
            ctx.logger()
                .warning(&format!("broadcast of {} failed: {}", action, e));
        }
    }

    /// Reload, rebuild, broadcast: the common tail of every task mutation.
    async fn after_commit(&self, ctx: &Context, user_id: i64, task_id: i64, action: &'static str) -> ServiceResult<Task> {
        let task = self.db.get_task(task_id)?;
        self.spawn_rebuild(ctx, task_id);
        self.emit(ctx, user_id, Event::new(action, &task)).await;
        Ok(task)
    }

    pub fn get(&self, user_id: i64, task_id: i64) -> ServiceResult<Task> {
        Ok(self.db.get_task_for(user_id, task_id)?)
    }

    pub fn list_active(&self, user_id: i64) -> ServiceResult<Vec<Task>> {
        Ok(self.db.list_active_tasks(user_id)?)
    }

    pub fn list_completed(&self, user_id: i64, page: Page) -> ServiceResult<Vec<Task>> {
        Ok(self
            .db
            .list_completed_tasks(user_id, page.limit(), page.offset())?)
    }

    pub async fn create(&self, ctx: &Context, user_id: i64, req: CreateTaskRequest) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let title = req.title()?;
        recurrence::validate(&req.frequency)?;
        let next_due_date = parse_utc_opt("next_due_date", req.next_due_date.as_deref())?;
        let end_date = parse_utc_opt("end_date", req.end_date.as_deref())?;
        let notification_triggers = match req.notification_triggers {
            Some(t) => t,
            None => self.db.get_notification_settings(user_id)?.triggers,
        };

        let task_id = self.db.create_task(&NewTask {
            title,
            created_by: user_id,
            frequency: req.frequency,
            next_due_date,
            end_date,
            is_rolling: req.is_rolling,
            notification_triggers,
            label_ids: req.labels,
        })?;
        ctx.logger().info(&format!("task {} created", task_id));

        self.after_commit(ctx, user_id, task_id, actions::TASK_CREATED).await
    }

    /// Replace a task's editable fields. `is_active` is carried over unchanged.
    pub async fn update(&self, ctx: &Context, user_id: i64, req: UpdateTaskRequest) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let existing = self.db.get_task_for(user_id, req.id)?;
        let title = req.title()?;
        recurrence::validate(&req.frequency)?;
        let next_due_date = parse_utc_opt("next_due_date", req.next_due_date.as_deref())?;
        let end_date = parse_utc_opt("end_date", req.end_date.as_deref())?;

        let mut task = existing;
        task.title = title;
        task.frequency = req.frequency;
        task.next_due_date = next_due_date;
        task.end_date = end_date;
        task.is_rolling = req.is_rolling;
        if let Some(triggers) = req.notification_triggers {
            task.notification_triggers = triggers;
        }
        self.db.upsert_task_with_labels(&task, &req.labels)?;
        self.after_commit(ctx, user_id, task.id, actions::TASK_UPDATED).await
    }

    fn load_active(&self, user_id: i64, task_id: i64) -> ServiceResult<Task> {
        let task = self.db.get_task_for(user_id, task_id)?;
        if !task.is_active {
            return Err(ServiceError::invalid_value("id", "task is not active"));
        }
        Ok(task)
    }

    /// Record a completion now and advance (or terminate) the task.
    pub async fn complete(&self, ctx: &Context, user_id: i64, task_id: i64) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let task = self.load_active(user_id, task_id)?;
        let now = self.clock.now();
        let next = recurrence::next_due(&task, now)?;
        self.db.complete_task(task_id, next, Some(now))?;
        ctx.logger().info(&format!(
            "task {} completed, next due {:?}",
            task_id, next
        ));
        self.after_commit(ctx, user_id, task_id, actions::TASK_COMPLETED).await
    }

    /// Move to the next occurrence without recording a completion.
    ///
    /// The occurrence is computed from the current due date, and the history row
    /// is written with no completion date.
    pub async fn skip(&self, ctx: &Context, user_id: i64, task_id: i64) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let task = self.load_active(user_id, task_id)?;
        let base = task.next_due_date.unwrap_or_else(|| self.clock.now());
        let next = recurrence::next_due(&task, base)?;
        self.db.complete_task(task_id, next, None)?;
        ctx.logger()
            .info(&format!("task {} skipped, next due {:?}", task_id, next));
        self.after_commit(ctx, user_id, task_id, actions::TASK_SKIPPED).await
    }

    /// Undo the latest completion or skip.
    pub async fn uncomplete(&self, ctx: &Context, user_id: i64, task_id: i64) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        self.db.is_task_owner(task_id, user_id)?;
        self.db.uncomplete_task(task_id)?;
        ctx.logger().info(&format!("task {} uncompleted", task_id));
        self.after_commit(ctx, user_id, task_id, actions::TASK_UNCOMPLETED).await
    }

    /// Set (or clear) the due date of an active task. History is untouched.
    pub async fn update_due_date(
        &self,
        ctx: &Context,
        user_id: i64,
        task_id: i64,
        due_date: Option<&str>,
    ) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let due = parse_utc_opt("due_date", due_date)?;
        let mut task = self.load_active(user_id, task_id)?;
        task.next_due_date = due;
        self.db.upsert_task(&task)?;
        self.after_commit(ctx, user_id, task_id, actions::TASK_UPDATED).await
    }

    /// Apply a title and due date coming from a CalDAV client.
    ///
    /// A missing summary keeps the stored title. Completed tasks keep no due date.
    pub async fn apply_calendar_update(
        &self,
        ctx: &Context,
        user_id: i64,
        task_id: i64,
        title: Option<String>,
        due: Option<DateTime<Utc>>,
    ) -> ServiceResult<Task> {
        ctx.ensure_active()?;
        let mut task = self.db.get_task_for(user_id, task_id)?;
        if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            task.title = title;
        }
        task.next_due_date = if task.is_active { due } else { None };
        self.db.upsert_task(&task)?;
        self.after_commit(ctx, user_id, task_id, actions::TASK_UPDATED).await
    }

    pub async fn delete(&self, ctx: &Context, user_id: i64, task_id: i64) -> ServiceResult<()> {
        ctx.ensure_active()?;
        self.db.is_task_owner(task_id, user_id)?;
        self.db.delete_task(task_id)?;
        ctx.logger().info(&format!("task {} deleted", task_id));
        self.emit(ctx, user_id, Event::new(actions::TASK_DELETED, json!({ "id": task_id })))
            .await;
        Ok(())
    }

    pub fn history(&self, user_id: i64, task_id: i64) -> ServiceResult<Vec<TaskHistory>> {
        self.db.is_task_owner(task_id, user_id)?;
        Ok(self.db.task_history(task_id)?)
    }
}
