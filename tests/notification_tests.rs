//! Integration tests for notification planning and the periodic jobs.
//!
//! Outbound deliveries go to a local mock HTTP server.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use task_wizard::broadcast::NoopBroadcaster;
use task_wizard::clock::FixedClock;
use task_wizard::db::Database;
use task_wizard::notifications::planner::{due_text, overdue_text, pre_due_text};
use task_wizard::notifications::{NotificationPump, Notifier, Planner, PumpConfig};
use task_wizard::service::{Context, TaskService};
use task_wizard::types::{
    Frequency, NewTask, Notification, NotificationProvider, NotificationSettings,
    NotificationTriggers, NotificationType,
};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn due() -> DateTime<Utc> {
    utc(2024, 3, 15, 10, 0)
}

fn setup_db() -> (Database, i64) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let user = db.create_user("alice").unwrap();
    (db, user.id)
}

fn create_task(db: &Database, user_id: i64, triggers: NotificationTriggers) -> i64 {
    db.create_task(&NewTask {
        title: "Laundry".into(),
        created_by: user_id,
        frequency: Frequency::once(),
        next_due_date: Some(due()),
        end_date: None,
        is_rolling: false,
        notification_triggers: triggers,
        label_ids: vec![],
    })
    .unwrap()
}

fn plan_task(db: &Database, task_id: i64) -> usize {
    let planner = Planner::new(db.clone(), TimeDelta::hours(3));
    planner.rebuild(&db.get_task(task_id).unwrap()).unwrap()
}

fn schedule(rows: &[Notification]) -> Vec<(NotificationType, DateTime<Utc>, String)> {
    let mut out: Vec<_> = rows
        .iter()
        .map(|n| (n.kind, n.scheduled_for, n.text.clone()))
        .collect();
    out.sort_by_key(|(_, at, _)| *at);
    out
}

fn pump(db: &Database, clock: Arc<FixedClock>) -> NotificationPump {
    NotificationPump::new(
        db.clone(),
        Notifier::new(Duration::from_secs(5)),
        clock,
        PumpConfig::default(),
    )
}

fn use_webhook(db: &Database, user_id: i64, url: String) {
    db.update_notification_settings(
        user_id,
        &NotificationSettings {
            provider: NotificationProvider::Webhook,
            url: Some(url),
            ..NotificationSettings::default()
        },
    )
    .unwrap();
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn rebuild_is_idempotent() {
    let (db, user) = setup_db();
    let task_id = create_task(&db, user, NotificationTriggers::all());

    assert_eq!(plan_task(&db, task_id), 5);
    let first = schedule(&db.list_task_notifications(task_id).unwrap());
    assert_eq!(plan_task(&db, task_id), 5);
    let second = schedule(&db.list_task_notifications(task_id).unwrap());

    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            (
                NotificationType::PreDue,
                due() - TimeDelta::hours(3),
                pre_due_text("Laundry", due())
            ),
            (NotificationType::DueDate, due(), due_text("Laundry")),
            (
                NotificationType::Overdue,
                due() + TimeDelta::hours(24),
                overdue_text("Laundry")
            ),
            (
                NotificationType::Overdue,
                due() + TimeDelta::hours(48),
                overdue_text("Laundry")
            ),
            (
                NotificationType::Overdue,
                due() + TimeDelta::hours(72),
                overdue_text("Laundry")
            ),
        ]
    );
}

#[test]
fn disabled_triggers_plan_nothing() {
    let (db, user) = setup_db();
    let task_id = create_task(&db, user, NotificationTriggers::disabled());
    assert_eq!(plan_task(&db, task_id), 0);

    let only_due = NotificationTriggers {
        enabled: true,
        due_date: true,
        pre_due: false,
        overdue: false,
    };
    let task_id = create_task(&db, user, only_due);
    assert_eq!(plan_task(&db, task_id), 1);
}

#[tokio::test]
async fn due_date_edit_replaces_every_row() {
    let (db, user) = setup_db();
    let clock = Arc::new(FixedClock::new(utc(2024, 3, 1, 0, 0)));
    let service = TaskService::new(
        db.clone(),
        Planner::new(db.clone(), TimeDelta::hours(3)),
        Arc::new(NoopBroadcaster),
        clock,
    );
    let ctx = Context::background("test");

    let task = service
        .create(
            &ctx,
            user,
            serde_json::from_value(json!({
                "title": "Laundry",
                "next_due_date": "2024-03-15T10:00:00Z",
                "notification_triggers": {"enabled": true, "due_date": true, "pre_due": true, "overdue": true}
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    service.flush_rebuilds().await;
    assert_eq!(db.list_task_notifications(task.id).unwrap().len(), 5);

    let moved = utc(2024, 3, 20, 18, 30);
    service
        .update_due_date(&ctx, user, task.id, Some("2024-03-20T18:30:00Z"))
        .await
        .unwrap();
    service.flush_rebuilds().await;

    let rows = db.list_task_notifications(task.id).unwrap();
    let mut times: Vec<_> = rows.iter().map(|n| n.scheduled_for).collect();
    times.sort();
    assert_eq!(
        times,
        vec![
            moved - TimeDelta::hours(3),
            moved,
            moved + TimeDelta::hours(24),
            moved + TimeDelta::hours(48),
            moved + TimeDelta::hours(72),
        ]
    );
    assert!(rows.iter().all(|n| !n.is_sent));
}

#[tokio::test]
async fn completing_a_one_shot_task_clears_its_rows() {
    let (db, user) = setup_db();
    let clock = Arc::new(FixedClock::new(utc(2024, 3, 15, 9, 0)));
    let service = TaskService::new(
        db.clone(),
        Planner::new(db.clone(), TimeDelta::hours(3)),
        Arc::new(NoopBroadcaster),
        clock,
    );
    let ctx = Context::background("test");
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    service.complete(&ctx, user, task_id).await.unwrap();
    service.flush_rebuilds().await;

    assert!(db.list_task_notifications(task_id).unwrap().is_empty());
}

// ============================================================================
// Sender
// ============================================================================

#[tokio::test]
async fn webhook_receives_due_rows_once() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"message": due_text("Laundry")})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let early = server
        .mock("POST", "/hook")
        .match_body(Matcher::Json(
            json!({"message": pre_due_text("Laundry", due())}),
        ))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let (db, user) = setup_db();
    use_webhook(&db, user, format!("{}/hook", server.url()));
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    let clock = Arc::new(FixedClock::new(due() + TimeDelta::minutes(1)));
    let pump = pump(&db, clock);

    let report = pump.send_due().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 0);

    // Already sent rows are not delivered again.
    let report = pump.send_due().await.unwrap();
    assert_eq!(report.delivered, 0);

    hook.assert_async().await;
    early.assert_async().await;

    let rows = db.list_task_notifications(task_id).unwrap();
    let sent = rows.iter().filter(|n| n.is_sent).count();
    assert_eq!(sent, 2);
}

#[tokio::test]
async fn gotify_gets_title_priority_and_key() {
    let mut server = mockito::Server::new_async().await;
    let gotify = server
        .mock("POST", "/message")
        .match_header("x-gotify-key", "app-secret")
        .match_body(Matcher::PartialJson(json!({
            "title": "Task Wizard",
            "message": due_text("Laundry"),
            "priority": 5
        })))
        .with_status(200)
        .create_async()
        .await;

    let (db, user) = setup_db();
    db.update_notification_settings(
        user,
        &NotificationSettings {
            provider: NotificationProvider::Gotify,
            url: Some(format!("{}/", server.url())),
            token: Some("app-secret".into()),
            ..NotificationSettings::default()
        },
    )
    .unwrap();
    let only_due = NotificationTriggers {
        enabled: true,
        due_date: true,
        pre_due: false,
        overdue: false,
    };
    let task_id = create_task(&db, user, only_due);
    plan_task(&db, task_id);

    let clock = Arc::new(FixedClock::new(due()));
    let report = pump(&db, clock).send_due().await.unwrap();
    assert_eq!(report.delivered, 1);
    gotify.assert_async().await;
}

#[tokio::test]
async fn failed_deliveries_stay_unsent() {
    let mut server = mockito::Server::new_async().await;
    let broken = server
        .mock("POST", "/hook")
        .with_status(500)
        .with_body("boom")
        .expect(2)
        .create_async()
        .await;

    let (db, user) = setup_db();
    use_webhook(&db, user, format!("{}/hook", server.url()));
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    let clock = Arc::new(FixedClock::new(due() + TimeDelta::minutes(1)));
    let report = pump(&db, clock).send_due().await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 2);
    broken.assert_async().await;

    let rows = db.list_task_notifications(task_id).unwrap();
    assert!(rows.iter().all(|n| !n.is_sent));
}

#[tokio::test]
async fn provider_none_marks_rows_sent_without_traffic() {
    let (db, user) = setup_db();
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    let clock = Arc::new(FixedClock::new(due()));
    let report = pump(&db, clock).send_due().await.unwrap();
    assert_eq!(report.delivered, 2);
}

// ============================================================================
// Sweeper and overdue synthesizer
// ============================================================================

#[tokio::test]
async fn sweep_removes_only_old_sent_rows() {
    let (db, user) = setup_db();
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    let clock = Arc::new(FixedClock::new(due()));
    let pump = pump(&db, clock.clone());
    pump.send_due().await.unwrap();

    // The due row is sent but still inside one due_frequency.
    assert_eq!(pump.sweep().unwrap(), 1);
    let rows = db.list_task_notifications(task_id).unwrap();
    assert_eq!(rows.len(), 4);

    clock.advance(TimeDelta::minutes(10));
    assert_eq!(pump.sweep().unwrap(), 1);
    let rows = db.list_task_notifications(task_id).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|n| n.kind == NotificationType::Overdue && !n.is_sent));
}

#[tokio::test]
async fn overdue_synthesis_respects_the_window() {
    let (db, user) = setup_db();
    let task_id = create_task(&db, user, NotificationTriggers::all());
    plan_task(&db, task_id);

    // A planned +24h row falls inside the window, so nothing is added.
    let clock = Arc::new(FixedClock::new(due() + TimeDelta::hours(30)));
    let pump = pump(&db, clock.clone());
    assert_eq!(pump.synthesize_overdue().unwrap(), 0);

    // The last planned row goes out and the sweeper runs; it must still count.
    clock.set(due() + TimeDelta::hours(72));
    pump.send_due().await.unwrap();
    clock.advance(TimeDelta::minutes(10));
    assert_eq!(pump.sweep().unwrap(), 4);
    clock.set(due() + TimeDelta::hours(73));
    assert_eq!(pump.synthesize_overdue().unwrap(), 0);

    // Past the last planned row: one reminder, then no duplicate.
    clock.set(due() + TimeDelta::hours(100));
    assert_eq!(pump.synthesize_overdue().unwrap(), 1);
    assert_eq!(pump.synthesize_overdue().unwrap(), 0);

    let synthesized: Vec<_> = db
        .list_task_notifications(task_id)
        .unwrap()
        .into_iter()
        .filter(|n| n.scheduled_for == due() + TimeDelta::hours(100))
        .collect();
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].kind, NotificationType::Overdue);
    assert_eq!(synthesized[0].text, overdue_text("Laundry"));
}

#[test]
fn overdue_synthesis_ignores_tasks_without_overdue_trigger() {
    let (db, user) = setup_db();
    let no_overdue = NotificationTriggers {
        enabled: true,
        due_date: true,
        pre_due: true,
        overdue: false,
    };
    create_task(&db, user, no_overdue);

    let clock = Arc::new(FixedClock::new(due() + TimeDelta::hours(100)));
    assert_eq!(pump(&db, clock).synthesize_overdue().unwrap(), 0);
}

#[tokio::test]
async fn jobs_stop_on_signal() {
    let (db, _) = setup_db();
    let clock = Arc::new(FixedClock::new(due()));
    let pump = Arc::new(NotificationPump::new(
        db,
        Notifier::new(Duration::from_secs(1)),
        clock,
        PumpConfig {
            due_frequency: Duration::from_millis(10),
            overdue_frequency: Duration::from_millis(10),
            cleanup: Duration::from_millis(10),
            overdue_synthesis: true,
        },
    ));
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let jobs = pump.start(stop_rx);
    assert_eq!(jobs.len(), 3);

    tokio::time::sleep(Duration::from_millis(30)).await;
    stop_tx.send(true).unwrap();
    for job in jobs {
        tokio::time::timeout(Duration::from_secs(2), job)
            .await
            .expect("job did not stop")
            .unwrap();
    }
}
