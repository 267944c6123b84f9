use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use tracing::{info, warn};

use sync_common::metrics::{setup_metrics_recorder, setup_metrics_routes};
use sync_common::store;
use sync_common::sync::BulkSync;
use sync_common::webhook::SignatureVerifier;

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let store = store::connect(&config.store).await?;
    let bulk_sync = BulkSync::from_config(&config.fetch, store.clone())?;

    let secret = config.webhook_secret.as_ref().map(|secret| secret.as_str().to_owned());
    if secret.is_none() {
        warn!("WEBHOOK_SECRET is not set, webhook signatures will not be verified");
    }
    let state = handlers::AppState {
        store,
        bulk_sync,
        sources: config.fetch.sources.clone(),
        verifier: SignatureVerifier::new(secret, config.webhook_require_signature),
        max_tickets: config.fetch.max_tickets_per_booking,
    };

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::add_routes(
        Router::new(),
        state,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app, recorder_handle);

    let bind = config.bind();
    info!(%bind, "starting sync api");
    if let Err(e) = listen(app, bind).await {
        tracing::error!("failed to start sync-api http server, {}", e);
        return Err(e);
    }

    Ok(())
}
