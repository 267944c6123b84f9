use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use sync_common::payload::publication;
use sync_common::status::{derive_status, EventStatus, Publication};
use sync_common::store::Store;

use crate::cleanup::{Cleaner, CleanerError};

/// Moves events along as time passes: upcoming to ongoing to completed.
///
/// Statuses are only re-derived from the stored dates and the stored upstream
/// payload, so a sweep always agrees with what the next sync would compute.
/// Only the status column is written.
pub struct StatusSweeper {
    store: Arc<dyn Store>,
}

impl StatusSweeper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Cleaner for StatusSweeper {
    fn name(&self) -> &'static str {
        "status_sweep"
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, CleanerError> {
        let events = self
            .store
            .events_with_status(&[EventStatus::Upcoming, EventStatus::Ongoing])
            .await?;

        let mut changed = 0;
        for event in events {
            let published = event
                .metadata
                .0
                .as_object()
                .map_or(Publication::Published, publication);
            let status = derive_status(now, event.start_at, event.end_at, published);
            if status == event.status {
                continue;
            }

            self.store.set_event_status(event.id, status).await?;
            metrics::counter!("janitor_status_changes_total", &[("status", status.as_str())])
                .increment(1);
            debug!(event_id = event.id, from = %event.status, to = %status, "event status changed");
            changed += 1;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};

    use sync_common::models::{EventKey, NewEvent, NewRegistration, RegistrationKey};
    use sync_common::source::SourceKey;
    use sync_common::store::MemoryStore;

    use super::*;

    fn source() -> SourceKey {
        SourceKey::normalize("https://events.example.com").unwrap()
    }

    fn event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, metadata: Value) -> NewEvent {
        NewEvent {
            source: source(),
            external_event_id: id.to_owned(),
            title: id.to_owned(),
            description: String::new(),
            start_at: start,
            end_at: Some(end),
            location: String::new(),
            address: String::new(),
            capacity: 0,
            image_url: None,
            status: EventStatus::Upcoming,
            metadata,
            synced_at: start - Duration::days(30),
        }
    }

    fn key(id: &str) -> EventKey {
        EventKey {
            source: source(),
            external_event_id: id.to_owned(),
        }
    }

    #[tokio::test]
    async fn test_sweep_completes_past_events_and_keeps_reminder_flags() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let past = store
            .upsert_event(&event(
                "past",
                now - Duration::hours(5),
                now - Duration::hours(3),
                json!({"id": "past"}),
            ))
            .await
            .unwrap();
        store
            .upsert_event(&event(
                "later",
                now + Duration::hours(3),
                now + Duration::hours(5),
                json!({"id": "later"}),
            ))
            .await
            .unwrap();
        let registration = store
            .upsert_registration(&NewRegistration {
                event_id: past.id,
                source: source(),
                external_booking_id: "9".to_owned(),
                attendee_index: 0,
                attendee_name: "Grace Hopper".to_owned(),
                email: "grace@example.com".to_owned(),
                phone: None,
                registered_at: None,
                metadata: json!({}),
                synced_at: now - Duration::days(1),
            })
            .await
            .unwrap();
        store
            .mark_reminder_sent(registration.id, now - Duration::hours(24))
            .await
            .unwrap();

        let changed = StatusSweeper::new(store.clone())
            .cleanup(now)
            .await
            .unwrap();

        assert_eq!(changed, 1);
        let past = store.find_event(&key("past")).await.unwrap().unwrap();
        assert_eq!(past.status, EventStatus::Completed);
        let later = store.find_event(&key("later")).await.unwrap().unwrap();
        assert_eq!(later.status, EventStatus::Upcoming);

        let registration = store
            .find_registration(&RegistrationKey {
                source: source(),
                external_booking_id: "9".to_owned(),
                attendee_index: 0,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(registration.reminder_sent);
        assert_eq!(
            registration.reminder_sent_at,
            Some(now - Duration::hours(24))
        );
        assert!(!registration.follow_up_sent);
    }

    #[tokio::test]
    async fn test_sweep_cancels_withdrawn_events() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        store
            .upsert_event(&event(
                "draft",
                now + Duration::days(2),
                now + Duration::days(3),
                json!({"id": "draft", "status": "draft"}),
            ))
            .await
            .unwrap();

        let sweeper = StatusSweeper::new(store.clone());
        assert_eq!(sweeper.cleanup(now).await.unwrap(), 1);
        // Cancelled events are no longer swept.
        assert_eq!(sweeper.cleanup(now).await.unwrap(), 0);

        let draft = store.find_event(&key("draft")).await.unwrap().unwrap();
        assert_eq!(draft.status, EventStatus::Cancelled);
    }
}
