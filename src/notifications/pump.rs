//! Periodic notification jobs.
//!
//! Three loops share one stop signal:
//! - **Sender** drains due rows through each owner's transport and marks them sent.
//! - **Sweeper** deletes sent rows older than one `due_frequency`.
//! - **Overdue synthesizer** adds a reminder for overdue tasks with no overdue row
//!   in the current window.
//!
//! The stop signal is observed between ticks, so an in-flight tick finishes first.

use super::planner::overdue_text;
use super::transport::{Notifier, Transport};
use crate::clock::Clock;
use crate::db::Database;
use crate::db::notifications::PendingNotification;
use crate::error::StoreResult;
use crate::types::{NewNotification, NotificationType};
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub due_frequency: Duration,
    pub overdue_frequency: Duration,
    /// Sweeper period.
    pub cleanup: Duration,
    pub overdue_synthesis: bool,
}

impl Default for PumpConfig {
    fn default() -> Self {
        let due_frequency = Duration::from_secs(5 * 60);
        Self {
            due_frequency,
            overdue_frequency: Duration::from_secs(24 * 60 * 60),
            cleanup: due_frequency * 2,
            overdue_synthesis: true,
        }
    }
}

/// Outcome of one Sender tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationPump {
    db: Database,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: PumpConfig,
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

impl NotificationPump {
    pub fn new(db: Database, notifier: Notifier, clock: Arc<dyn Clock>, config: PumpConfig) -> Self {
        Self {
            db,
            notifier,
            clock,
            config,
        }
    }

    /// Deliver every due, unsent row. Failed rows stay unsent for the next tick.
    pub async fn send_due(&self) -> StoreResult<SendReport> {
        let now = self.clock.now();
        let pending = self.db.due_notifications(now)?;
        if pending.is_empty() {
            return Ok(SendReport::default());
        }

        let mut report = SendReport::default();
        let mut delivered_ids = Vec::with_capacity(pending.len());

        // Rows arrive ordered by user, so each run shares one settings snapshot.
        for group in pending.chunk_by(|a, b| a.notification.user_id == b.notification.user_id) {
            let user_id = group[0].notification.user_id;
            let transport = match Transport::from_settings(&group[0].settings) {
                Ok(t) => t,
                Err(e) => {
                    warn!(user_id, error = %e, "Skipping notifications for misconfigured user");
                    report.failed += group.len();
                    continue;
                }
            };

            for PendingNotification { notification, .. } in group {
                match self.notifier.deliver(&transport, notification).await {
                    Ok(()) => delivered_ids.push(notification.id),
                    Err(e) => {
                        warn!(
                            notification_id = notification.id,
                            user_id,
                            transport = transport.name(),
                            error = %e,
                            "Notification delivery failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        report.delivered = self.db.mark_notifications_sent(&delivered_ids)?;
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Notification send tick"
        );
        Ok(report)
    }

    /// Delete sent rows scheduled more than one `due_frequency` ago. Sent overdue
    /// rows stay until they drop out of the synthesizer's look-back window.
    pub fn sweep(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let before = now
            .checked_sub_signed(to_delta(self.config.due_frequency))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let overdue_before = now
            .checked_sub_signed(to_delta(self.config.overdue_frequency))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.db.sweep_sent_notifications(before, overdue_before)?;
        if removed > 0 {
            debug!(count = removed, "Swept sent notifications");
        }
        Ok(removed)
    }

    /// Insert one overdue reminder "now" for each overdue task lacking one in
    /// `(now - overdue_frequency, now + overdue_frequency]`. Returns rows inserted.
    pub fn synthesize_overdue(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let window = to_delta(self.config.overdue_frequency);

        let mut rows = Vec::new();
        for task in self.db.overdue_candidates(now)? {
            let from = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let to = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if self.db.has_overdue_in_window(task.id, from, to)? {
                continue;
            }
            rows.push(NewNotification {
                task_id: task.id,
                user_id: task.created_by,
                text: overdue_text(&task.title),
                kind: NotificationType::Overdue,
                scheduled_for: now,
            });
        }

        if !rows.is_empty() {
            self.db.insert_notifications(&rows)?;
            info!(count = rows.len(), "Synthesized overdue notifications");
        }
        Ok(rows.len())
    }

    /// Spawn the periodic jobs. They exit after `stop` flips to `true` (or its sender drops).
    pub fn start(self: Arc<Self>, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);

        let pump = Arc::clone(&self);
        handles.push(tokio::spawn(run_periodic(
            "sender",
            self.config.due_frequency,
            stop.clone(),
            move || {
                let pump = Arc::clone(&pump);
                async move {
                    if let Err(e) = pump.send_due().await {
                        error!(error = %e, "Notification sender tick failed");
                    }
                }
            },
        )));

        let pump = Arc::clone(&self);
        handles.push(tokio::spawn(run_periodic(
            "sweeper",
            self.config.cleanup,
            stop.clone(),
            move || {
                let pump = Arc::clone(&pump);
                async move {
                    if let Err(e) = pump.sweep() {
                        error!(error = %e, "Notification sweeper tick failed");
                    }
                }
            },
        )));

        if self.config.overdue_synthesis {
            let pump = Arc::clone(&self);
            handles.push(tokio::spawn(run_periodic(
                "overdue",
                self.config.overdue_frequency,
                stop,
                move || {
                    let pump = Arc::clone(&pump);
                    async move {
                        if let Err(e) = pump.synthesize_overdue() {
                            error!(error = %e, "Overdue synthesizer tick failed");
                        }
                    }
                },
            )));
        }

        handles
    }
}

async fn run_periodic<F, Fut>(name: &'static str, period: Duration, mut stop: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(job = name, period = ?period, "Notification job started");

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => tick().await,
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(job = name, "Notification job stopped");
}
