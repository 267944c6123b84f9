//! Bulk sync every configured source on a schedule.
use axum::{routing::get, Router};
use envconfig::Envconfig;
use tracing::{error, warn};

use health::HealthRegistry;
use sync_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use sync_common::store;
use sync_common::sync::BulkSync;
use sync_worker::config::Config;
use sync_worker::error::WorkerError;
use sync_worker::worker::SyncWorker;

async fn index() -> &'static str {
    "event sync worker"
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;
    if config.fetch.sources.is_empty() {
        warn!("SYNC_SOURCES is empty, scheduled passes will have nothing to do");
    }

    let store = store::connect(&config.store).await?;
    let bulk_sync = BulkSync::from_config(&config.fetch, store)?;

    // A pass reports in after every source, so it only goes quiet for a full
    // interval or for one source that runs into its timeout.
    let deadline = config.sync_interval.0.max(config.sync_timeout.0) * 2;
    let liveness = HealthRegistry::new("liveness");
    let worker = SyncWorker::new(
        bulk_sync,
        config.fetch.sources.clone(),
        config.sync_interval.0,
        config.sync_timeout.0,
        liveness.register("worker", time::Duration::try_from(deadline)?),
    );

    let recorder_handle = setup_metrics_recorder()?;
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        );
    let router = setup_metrics_routes(router, recorder_handle);

    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to start serving metrics, {}", e);
        }
    });

    worker.run().await;

    Ok(())
}
