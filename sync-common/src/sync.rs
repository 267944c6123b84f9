use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument};

use crate::config::{FetchConfig, SourceConfig};
use crate::error::{ConfigError, SyncError};
use crate::expander::DEFAULT_MAX_TICKETS_PER_BOOKING;
use crate::fetcher::Fetcher;
use crate::reconcile::{BookingReconciler, EventReconciler, SyncReport};
use crate::store::Store;

/// Pulls every event and booking of a source and reconciles them into the store.
///
/// Events always go first so the bookings fetched afterwards can resolve them.
/// Only failing to fetch a collection fails the run; record-level problems end
/// up in the returned `SyncReport`.
#[derive(Clone)]
pub struct BulkSync {
    fetcher: Fetcher,
    store: Arc<dyn Store>,
    events_path: String,
    bookings_path: String,
    max_tickets: u32,
}

impl BulkSync {
    pub fn new(
        fetcher: Fetcher,
        store: Arc<dyn Store>,
        events_path: &str,
        bookings_path: &str,
    ) -> Self {
        Self {
            fetcher,
            store,
            events_path: events_path.to_owned(),
            bookings_path: bookings_path.to_owned(),
            max_tickets: DEFAULT_MAX_TICKETS_PER_BOOKING,
        }
    }

    pub fn from_config(config: &FetchConfig, store: Arc<dyn Store>) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Fetcher::from_config(config)?,
            store,
            &config.events_path,
            &config.bookings_path,
        )
        .max_tickets(config.max_tickets_per_booking))
    }

    /// Reject bookings describing more than `max_tickets` attendees.
    pub fn max_tickets(mut self, max_tickets: u32) -> Self {
        self.max_tickets = max_tickets;
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[instrument(skip_all, fields(source = %source.key))]
    pub async fn run(&self, source: &SourceConfig) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let token = source.token.as_deref();
        let mut report = SyncReport::new(source.key.clone());

        let events = self
            .fetcher
            .fetch_all(&source.key.endpoint(&self.events_path), "events", token)
            .await?;
        report.events = EventReconciler::new(self.store(), &source.key)
            .reconcile_all(events.records, Utc::now())
            .await;

        let bookings = self
            .fetcher
            .fetch_all(&source.key.endpoint(&self.bookings_path), "bookings", token)
            .await?;
        report.registrations = BookingReconciler::new(self.store(), &source.key)
            .max_tickets(self.max_tickets)
            .reconcile_all(bookings.records, Utc::now())
            .await;

        let elapsed = start.elapsed().as_secs_f64();
        metrics::histogram!("sync_run_duration_seconds").record(elapsed);
        info!(
            events_synced = report.events.synced,
            event_errors = report.events.errors,
            registrations_synced = report.registrations.synced,
            registration_errors = report.registrations.errors,
            fallbacks = report.registrations.fallbacks,
            elapsed,
            "finished sync"
        );

        Ok(report)
    }
}
