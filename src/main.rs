//! Task Wizard server
//!
//! Recurring personal tasks behind a JSON API, a WebSocket channel and a
//! CalDAV collection, with webhook/Gotify reminders.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::Parser;
use std::sync::Arc;
use task_wizard::broadcast::ConnectionHub;
use task_wizard::cli::{Cli, Command, migrate, user};
use task_wizard::clock::{Clock, SystemClock};
use task_wizard::config::{Config, ConfigLoader};
use task_wizard::db::Database;
use task_wizard::logging;
use task_wizard::notifications::{NotificationPump, Notifier, Planner};
use task_wizard::server::{self, AppState};
use task_wizard::service::TaskService;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log, cli.verbose)?;

    let mut loader = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(path) = loader.config_path() {
        info!("Config file: {}", path.display());
    }
    for var in loader.env_overrides() {
        info!("Config override from {}", var);
    }

    // CLI flags win over file and environment.
    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.database.path = db_path.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let config = loader.into_config();

    match cli.command {
        Some(Command::Migrate(args)) => {
            migrate::run_migrate(&config.database.path, &args)?;
        }
        Some(Command::User(args)) => {
            let db = open_database(&config)?;
            user::run_user(&db, &args)?;
        }
        Some(Command::Serve) | None => {
            run_server(config).await?;
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))
}

/// Run the HTTP server and notification jobs until Ctrl-C.
async fn run_server(config: Config) -> Result<()> {
    info!("Starting Task Wizard v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {:?}", config.database.path);

    let db = open_database(&config)?;
    info!("Database initialized successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hub = Arc::new(ConnectionHub::new());
    let pre_due_offset = TimeDelta::from_std(config.notifications.pre_due_offset.as_duration())
        .context("notifications.pre_due_offset is out of range")?;
    let planner = Planner::new(db.clone(), pre_due_offset);
    let service = Arc::new(TaskService::new(
        db.clone(),
        planner,
        hub.clone(),
        Arc::clone(&clock),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    let notifier = Notifier::new(config.notifications.timeout.as_duration());
    let pump = Arc::new(NotificationPump::new(
        db,
        notifier,
        clock,
        config.pump_config(),
    ));
    let jobs = pump.start(stop_rx.clone());
    info!(
        due_frequency = %config.scheduler_jobs.due_frequency,
        overdue_frequency = %config.scheduler_jobs.overdue_frequency,
        "Notification jobs started"
    );

    let state = AppState::new(Arc::clone(&service), hub, stop_rx);
    let server = server::start_server(state, &config.server).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    let _ = stop_tx.send(true);
    server.shutdown().await;
    for job in jobs {
        if let Err(e) = job.await {
            error!("Notification job failed: {}", e);
        }
    }
    service.flush_rebuilds().await;

    info!("Task Wizard stopped");
    Ok(())
}
