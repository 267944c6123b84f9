//! The local store reconciled records are written to.
//!
//! Reconcilers only ever see the `Store` trait, so the bulk sync and webhook
//! paths run unchanged against Postgres in production and against
//! `MemoryStore` in tests. Every write is a keyed, row-atomic upsert or a
//! mutation of one field group; no operation spans a multi-row transaction.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreResult;
use crate::models::{CheckIn, Event, EventKey, NewEvent, NewRegistration, Registration, RegistrationKey};
use crate::source::SourceKey;
use crate::status::EventStatus;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A registration due for a reminder or follow-up, with its event.
#[derive(Debug, Clone, PartialEq)]
pub struct DueNotification {
    pub event: Event,
    pub registration: Registration,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite every non-key field of the event with `event`'s natural key.
    async fn upsert_event(&self, event: &NewEvent) -> StoreResult<Event>;

    async fn find_event(&self, key: &EventKey) -> StoreResult<Option<Event>>;

    /// Events with this external id under any source, most recently synced first.
    async fn find_events_by_external_id(&self, external_event_id: &str) -> StoreResult<Vec<Event>>;

    /// Delete an event and, through the cascade, all of its registrations.
    async fn delete_event(&self, key: &EventKey) -> StoreResult<bool>;

    /// Events whose start falls in `[from, to)`, ordered by start.
    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>>;

    async fn events_with_status(&self, statuses: &[EventStatus]) -> StoreResult<Vec<Event>>;

    /// Only touches the status column.
    async fn set_event_status(&self, event_id: i64, status: EventStatus) -> StoreResult<()>;

    async fn count_events(&self) -> StoreResult<u64>;

    /// Delete (or with `dry_run`, only count) events that finished before `cutoff`.
    /// An event finishes at its end date, or at its start date when it has none.
    async fn delete_events_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> StoreResult<u64>;

    /// Insert or overwrite the reconciler-owned fields of a registration. Check-in,
    /// reminder and follow-up state of an existing row is left untouched.
    async fn upsert_registration(&self, registration: &NewRegistration) -> StoreResult<Registration>;

    async fn find_registration(&self, key: &RegistrationKey) -> StoreResult<Option<Registration>>;

    async fn registrations_for_event(&self, event_id: i64) -> StoreResult<Vec<Registration>>;

    async fn count_registrations(&self) -> StoreResult<u64>;

    /// Delete every registration expanded from one booking.
    async fn delete_booking(&self, source: &SourceKey, external_booking_id: &str) -> StoreResult<u64>;

    /// Mark an attendee as checked in. Returns `None` when no such registration exists.
    async fn check_in(
        &self,
        key: &RegistrationKey,
        check_in: &CheckIn,
    ) -> StoreResult<Option<Registration>>;

    /// Registrations without a reminder whose non-cancelled event starts in `[from, to)`.
    async fn pending_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>>;

    /// Registrations without a follow-up whose completed event ended in `[from, to)`.
    async fn pending_follow_ups(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>>;

    async fn mark_reminder_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_follow_up_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()>;
}

/// How the owning event of a booking was found.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResolution {
    Found(Event),
    /// Found only by external id under a different source. The source identifier
    /// of the booking and of the event have drifted apart.
    FoundByFallback(Event),
    NotFound,
}

/// Look an event up by its natural key, falling back once to the external id
/// alone across all sources.
pub async fn resolve_event(store: &dyn Store, key: &EventKey) -> StoreResult<EventResolution> {
    if let Some(event) = store.find_event(key).await? {
        return Ok(EventResolution::Found(event));
    }

    let candidates = store
        .find_events_by_external_id(&key.external_event_id)
        .await?;
    match candidates.into_iter().next() {
        Some(event) => {
            warn!(
                source = %key.source,
                external_event_id = %key.external_event_id,
                resolved_source = %event.source,
                "event resolved by external id only, source identifiers have drifted"
            );
            Ok(EventResolution::FoundByFallback(event))
        }
        None => Ok(EventResolution::NotFound),
    }
}

/// Build the store a process was configured with.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store, nothing will survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgStore::new(&config.database_url, config.max_pg_connections).await?;
            if config.run_migrations {
                store.migrate().await?;
                info!("applied database migrations");
            }
            Ok(Arc::new(store))
        }
    }
}
