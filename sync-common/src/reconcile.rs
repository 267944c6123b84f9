//! Turning decoded upstream records into rows.
//!
//! Both ingress paths end here: a bulk sync hands over whole collections, a
//! webhook a single record. Failures of one record never abort the others;
//! they are counted in a `Tally` and logged.
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RecordError;
use crate::expander::{expand_booking, AttendeeCandidate, DEFAULT_MAX_TICKETS_PER_BOOKING};
use crate::metrics::record_outcome;
use crate::models::{Event, EventKey, NewEvent, NewRegistration, Registration};
use crate::payload::{BookingPayload, EventPayload};
use crate::source::SourceKey;
use crate::status::derive_status;
use crate::store::{resolve_event, EventResolution, Store};

/// Counters of one reconciliation pass.
///
/// `total` counts every record (or, for registrations, every attendee slot a
/// booking described), so `total == synced + errors` always holds. `fallbacks`
/// counts synced registrations whose event was found by external id only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: u64,
    pub synced: u64,
    pub errors: u64,
    pub fallbacks: u64,
}

impl Tally {
    fn synced(&mut self) {
        self.total += 1;
        self.synced += 1;
    }

    fn error(&mut self) {
        self.total += 1;
        self.errors += 1;
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.synced += other.synced;
        self.errors += other.errors;
        self.fallbacks += other.fallbacks;
    }
}

/// What one sync of one source did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub source: SourceKey,
    pub events: Tally,
    pub registrations: Tally,
}

impl SyncReport {
    pub fn new(source: SourceKey) -> Self {
        Self {
            source,
            events: Tally::default(),
            registrations: Tally::default(),
        }
    }
}

fn skipped(entity: &'static str, source: &SourceKey, error: &RecordError) {
    warn!(%source, entity, reason = error.reason(), "skipping record: {}", error);
    record_outcome(entity, error.reason());
}

/// Maps raw upstream events of one source onto `events` rows.
pub struct EventReconciler<'a> {
    store: &'a dyn Store,
    source: &'a SourceKey,
}

impl<'a> EventReconciler<'a> {
    pub fn new(store: &'a dyn Store, source: &'a SourceKey) -> Self {
        Self { store, source }
    }

    /// Decode and upsert one event. Status is derived against `now`.
    pub async fn reconcile(&self, raw: Value, now: DateTime<Utc>) -> Result<Event, RecordError> {
        let payload = EventPayload::decode(raw)?;
        let start_at = payload.start.ok_or_else(|| RecordError::MissingStartDate {
            external_id: payload.external_id.clone(),
        })?;

        let event = NewEvent {
            source: self.source.clone(),
            status: derive_status(now, start_at, payload.end, payload.publication),
            external_event_id: payload.external_id,
            title: payload.title,
            description: payload.description,
            start_at,
            end_at: payload.end,
            location: payload.location,
            address: payload.address,
            capacity: payload.capacity,
            image_url: payload.image_url,
            metadata: payload.raw,
            synced_at: now,
        };

        let event = self.store.upsert_event(&event).await?;
        debug!(source = %self.source, external_event_id = %event.external_event_id, status = %event.status, "upserted event");
        record_outcome("event", "synced");
        Ok(event)
    }

    pub async fn reconcile_all(&self, records: Vec<Value>, now: DateTime<Utc>) -> Tally {
        let mut tally = Tally::default();

        for raw in records {
            match self.reconcile(raw, now).await {
                Ok(_) => tally.synced(),
                Err(error) => {
                    skipped("event", self.source, &error);
                    tally.error();
                }
            }
        }

        tally
    }
}

/// Expands raw upstream bookings of one source into `attendee_registrations` rows.
pub struct BookingReconciler<'a> {
    store: &'a dyn Store,
    source: &'a SourceKey,
    max_tickets: u32,
}

impl<'a> BookingReconciler<'a> {
    pub fn new(store: &'a dyn Store, source: &'a SourceKey) -> Self {
        Self {
            store,
            source,
            max_tickets: DEFAULT_MAX_TICKETS_PER_BOOKING,
        }
    }

    /// Reject bookings describing more than `max_tickets` attendees.
    pub fn max_tickets(mut self, max_tickets: u32) -> Self {
        self.max_tickets = max_tickets;
        self
    }

    /// Expand and upsert one booking, counting every attendee slot it describes.
    pub async fn reconcile(&self, raw: Value, now: DateTime<Utc>) -> Tally {
        let mut tally = Tally::default();

        let booking = match BookingPayload::decode(raw) {
            Ok(booking) => booking,
            Err(error) => {
                skipped("registration", self.source, &error);
                tally.error();
                return tally;
            }
        };

        let expansion = expand_booking(&booking, self.max_tickets);
        for error in &expansion.rejected {
            skipped("registration", self.source, error);
            tally.error();
        }
        if expansion.candidates.is_empty() {
            return tally;
        }

        // Every candidate of a booking belongs to the same event.
        let key = EventKey {
            source: self.source.clone(),
            external_event_id: booking.external_event_id.clone(),
        };
        let (event, by_fallback) = match resolve_event(self.store, &key).await {
            Ok(EventResolution::Found(event)) => (event, false),
            Ok(EventResolution::FoundByFallback(event)) => (event, true),
            Ok(EventResolution::NotFound) => {
                let error = RecordError::UnresolvedEvent {
                    booking_id: booking.booking_id.clone(),
                    external_event_id: booking.external_event_id.clone(),
                };
                for _ in &expansion.candidates {
                    skipped("registration", self.source, &error);
                    tally.error();
                }
                return tally;
            }
            Err(error) => {
                let error = RecordError::from(error);
                for _ in &expansion.candidates {
                    skipped("registration", self.source, &error);
                    tally.error();
                }
                return tally;
            }
        };

        for candidate in expansion.candidates {
            match self.upsert(&event, candidate, now).await {
                Ok(_) => {
                    tally.synced();
                    record_outcome("registration", "synced");
                    if by_fallback {
                        tally.fallbacks += 1;
                        metrics::counter!("sync_event_fallback_total").increment(1);
                    }
                }
                Err(error) => {
                    skipped("registration", self.source, &error);
                    tally.error();
                }
            }
        }

        tally
    }

    pub async fn reconcile_all(&self, records: Vec<Value>, now: DateTime<Utc>) -> Tally {
        let mut tally = Tally::default();
        for raw in records {
            tally += self.reconcile(raw, now).await;
        }
        tally
    }

    async fn upsert(
        &self,
        event: &Event,
        candidate: AttendeeCandidate,
        now: DateTime<Utc>,
    ) -> Result<Registration, RecordError> {
        let attendee_index =
            i32::try_from(candidate.attendee_index).map_err(|_| RecordError::IndexOutOfRange {
                booking_id: candidate.external_booking_id.clone(),
                index: candidate.attendee_index,
            })?;
        let registration = NewRegistration {
            event_id: event.id,
            source: self.source.clone(),
            external_booking_id: candidate.external_booking_id,
            attendee_index,
            attendee_name: candidate.attendee_name,
            email: candidate.email,
            phone: candidate.phone,
            registered_at: candidate.registered_at,
            metadata: candidate.metadata,
            synced_at: now,
        };

        Ok(self.store.upsert_registration(&registration).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::models::RegistrationKey;
    use crate::status::EventStatus;
    use crate::store::MemoryStore;

    fn source(raw: &str) -> SourceKey {
        SourceKey::normalize(raw).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    fn event_json(id: &str) -> Value {
        json!({
            "id": id,
            "title": format!("Event {id}"),
            "start_date": "2030-07-01",
            "start_time": "18:00",
            "end_date": "2030-07-01",
            "end_time": "20:00",
        })
    }

    #[tokio::test]
    async fn test_event_reconciler_counts_and_derives_status() {
        let store = MemoryStore::new();
        let site = source("https://a.example");
        let reconciler = EventReconciler::new(&store, &site);

        let tally = reconciler
            .reconcile_all(
                vec![
                    event_json("1"),
                    json!({"id": "2", "title": "No date"}),
                    json!({"id": "3", "start": "2030-01-01 10:00", "status": "draft"}),
                ],
                now(),
            )
            .await;

        assert_eq!(
            tally,
            Tally {
                total: 3,
                synced: 2,
                errors: 1,
                fallbacks: 0
            }
        );

        let upcoming = store
            .find_event(&EventKey {
                source: site.clone(),
                external_event_id: "1".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upcoming.status, EventStatus::Upcoming);
        assert_eq!(upcoming.metadata.0, event_json("1"));

        let withdrawn = store
            .find_event(&EventKey {
                source: site,
                external_event_id: "3".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(withdrawn.status, EventStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_start_date_is_reported() {
        let store = MemoryStore::new();
        let site = source("https://a.example");

        let result = EventReconciler::new(&store, &site)
            .reconcile(json!({"id": "9", "start": "not a date"}), now())
            .await;

        assert!(matches!(result, Err(RecordError::MissingStartDate { .. })));
        assert_eq!(store.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_booking_falls_back_across_sources() {
        let store = MemoryStore::new();
        let events_site = source("https://www.a.example");
        let bookings_site = source("https://a.example");
        EventReconciler::new(&store, &events_site)
            .reconcile(event_json("1"), now())
            .await
            .unwrap();

        let tally = BookingReconciler::new(&store, &bookings_site)
            .reconcile(
                json!({"id": "b1", "event_id": "1", "name": "Jane", "email": "jane@example.com"}),
                now(),
            )
            .await;

        assert_eq!(tally.synced, 1);
        assert_eq!(tally.fallbacks, 1);

        let registration = store
            .find_registration(&RegistrationKey {
                source: bookings_site,
                external_booking_id: "b1".to_owned(),
                attendee_index: 0,
            })
            .await
            .unwrap()
            .unwrap();
        let event = store
            .find_events_by_external_id("1")
            .await
            .unwrap()
            .remove(0);
        assert_eq!(registration.event_id, event.id);
    }

    #[tokio::test]
    async fn test_unresolvable_booking_counts_every_attendee() {
        let store = MemoryStore::new();
        let site = source("https://a.example");

        let tally = BookingReconciler::new(&store, &site)
            .reconcile(
                json!({"id": "b1", "event_id": "missing", "name": "Jane", "email": "jane@example.com", "tickets": 2}),
                now(),
            )
            .await;

        assert_eq!(
            tally,
            Tally {
                total: 2,
                synced: 0,
                errors: 2,
                fallbacks: 0
            }
        );
        assert_eq!(store.count_registrations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_registration_survives_resync_with_check_in() {
        let store = MemoryStore::new();
        let site = source("https://a.example");
        EventReconciler::new(&store, &site)
            .reconcile(event_json("1"), now())
            .await
            .unwrap();
        let booking = json!({
            "id": "b1",
            "event_id": "1",
            "attendees": [{"name": "Guest", "email": "guest@example.com"}],
        });
        let reconciler = BookingReconciler::new(&store, &site);
        reconciler.reconcile(booking.clone(), now()).await;

        let key = RegistrationKey {
            source: site.clone(),
            external_booking_id: "b1".to_owned(),
            attendee_index: 0,
        };
        let check_in = crate::models::CheckIn {
            at: now(),
            operator: None,
        };
        store.check_in(&key, &check_in).await.unwrap();

        let later = now() + Duration::hours(1);
        reconciler.reconcile(booking, later).await;

        let registration = store.find_registration(&key).await.unwrap().unwrap();
        assert!(registration.checked_in);
        assert_eq!(registration.last_synced_at, later);
        assert_eq!(store.count_registrations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_booking_over_ticket_limit_is_one_error() {
        let store = MemoryStore::new();
        let site = source("https://a.example");
        EventReconciler::new(&store, &site)
            .reconcile(event_json("1"), now())
            .await
            .unwrap();

        let tally = BookingReconciler::new(&store, &site)
            .max_tickets(50)
            .reconcile(
                json!({"id": "b1", "event_id": "1", "name": "Jane", "email": "jane@example.com", "tickets": 4294967295_u64}),
                now(),
            )
            .await;

        assert_eq!(
            tally,
            Tally {
                total: 1,
                synced: 0,
                errors: 1,
                fallbacks: 0
            }
        );
        assert_eq!(store.count_registrations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attendee_index_beyond_i32_is_a_record_error() {
        let store = MemoryStore::new();
        let site = source("https://a.example");
        let event = EventReconciler::new(&store, &site)
            .reconcile(event_json("1"), now())
            .await
            .unwrap();
        let candidate = AttendeeCandidate {
            external_booking_id: "b1".to_owned(),
            external_event_id: "1".to_owned(),
            attendee_index: u32::MAX - 1,
            attendee_name: "Jane".to_owned(),
            email: "jane@example.com".to_owned(),
            phone: None,
            registered_at: None,
            metadata: json!({}),
        };

        let result = BookingReconciler::new(&store, &site)
            .upsert(&event, candidate, now())
            .await;

        assert!(matches!(
            result,
            Err(RecordError::IndexOutOfRange {
                index: 4294967294,
                ..
            })
        ));
        assert_eq!(store.count_registrations().await.unwrap(), 0);
    }

    #[test]
    fn test_tally_accumulates() {
        let mut tally = Tally {
            total: 2,
            synced: 1,
            errors: 1,
            fallbacks: 0,
        };
        tally += Tally {
            total: 3,
            synced: 3,
            errors: 0,
            fallbacks: 1,
        };

        assert_eq!(tally.total, 5);
        assert_eq!(tally.synced, 4);
        assert_eq!(tally.errors, 1);
        assert_eq!(tally.fallbacks, 1);
    }
}
