//! Periodic maintenance of the reconciled store: status sweep, reminders and
//! follow-ups, and age-based retention.
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use cleanup::Cleaner;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use tracing::info;

use health::{HealthHandle, HealthRegistry};
use reminders::{LogNotifier, ReminderDispatcher};
use retention::RetentionCleaner;
use status_sweep::StatusSweeper;
use sync_common::metrics::{setup_metrics_recorder, setup_metrics_routes};
use sync_common::store;

mod cleanup;
mod config;
mod handlers;
mod reminders;
mod retention;
mod status_sweep;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn cleanup_loop(cleaners: Vec<Box<dyn Cleaner>>, interval: Duration, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;
        cleanup::run_all(&cleaners, Utc::now()).await;
        liveness.report_healthy();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let store = store::connect(&config.store).await?;

    let mut cleaners: Vec<Box<dyn Cleaner>> = vec![
        Box::new(StatusSweeper::new(store.clone())),
        Box::new(ReminderDispatcher::new(
            store.clone(),
            Arc::new(LogNotifier),
            chrono::Duration::from_std(config.reminder_lead.0)?,
            chrono::Duration::from_std(config.follow_up_window.0)?,
        )),
    ];
    match config.retention_days {
        Some(days) => cleaners.push(Box::new(RetentionCleaner::new(store, days))),
        None => info!("RETENTION_DAYS is not set, finished events are kept"),
    }

    let liveness = HealthRegistry::new("liveness");
    let handle = liveness.register(
        "janitor",
        time::Duration::try_from(config.cleanup_interval.0 * 2)?,
    );
    let cleanup_loop = Box::pin(cleanup_loop(cleaners, config.cleanup_interval.0, handle));

    let recorder_handle = setup_metrics_recorder()?;
    let app = setup_metrics_routes(handlers::app(liveness), recorder_handle);
    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, cleanup_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => tracing::error!("failed to start sync-janitor http server, {}", e),
        },
        Either::Right((_, _)) => {
            tracing::error!("sync-janitor cleanup task exited")
        }
    };

    Ok(())
}
