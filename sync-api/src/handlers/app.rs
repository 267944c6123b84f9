use std::convert::Infallible;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing, Router};
use tower::limit::ConcurrencyLimitLayer;

use sync_common::config::SourceList;
use sync_common::store::Store;
use sync_common::sync::BulkSync;
use sync_common::webhook::SignatureVerifier;

use super::{cleanup, sync, webhook};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bulk_sync: BulkSync,
    pub sources: SourceList,
    pub verifier: SignatureVerifier,
    /// Booking deliveries describing more attendees than this are rejected.
    pub max_tickets: u32,
}

pub fn add_routes(
    router: Router,
    state: AppState,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
        .route(
            "/webhook",
            routing::post(webhook::post_webhook)
                .with_state(state.clone())
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/sync", routing::post(sync::post_sync).with_state(state.clone()))
        .route("/cleanup", routing::post(cleanup::post_cleanup).with_state(state))
}

pub async fn index() -> &'static str {
    "event sync api"
}
