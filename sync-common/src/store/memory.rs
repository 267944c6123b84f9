use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{DueNotification, Store};
use crate::error::StoreResult;
use crate::models::{
    CheckIn, Event, EventKey, NewEvent, NewRegistration, Registration, RegistrationKey,
    TICKETS_PER_REGISTRATION,
};
use crate::source::SourceKey;
use crate::status::EventStatus;

#[derive(Default)]
struct Tables {
    next_event_id: i64,
    next_registration_id: i64,
    events: BTreeMap<EventKey, Event>,
    registrations: BTreeMap<RegistrationKey, Registration>,
}

impl Tables {
    fn registration_by_id(&mut self, id: i64) -> Option<&mut Registration> {
        self.registrations
            .values_mut()
            .find(|registration| registration.id == id)
    }

    fn due(&self, events: Vec<Event>, pending: impl Fn(&Registration) -> bool) -> Vec<DueNotification> {
        let mut due = Vec::new();
        for event in events {
            let mut registrations: Vec<&Registration> = self
                .registrations
                .values()
                .filter(|registration| registration.event_id == event.id && pending(registration))
                .collect();
            registrations.sort_by_key(|registration| registration.id);
            due.extend(registrations.into_iter().map(|registration| DueNotification {
                event: event.clone(),
                registration: registration.clone(),
            }));
        }
        due
    }
}

/// An in-process `Store` with the same keying and cascade rules as `PgStore`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_event(&self, event: &NewEvent) -> StoreResult<Event> {
        let mut tables = self.tables.lock().await;
        let key = event.key();
        let id = match tables.events.get(&key) {
            Some(existing) => existing.id,
            None => {
                tables.next_event_id += 1;
                tables.next_event_id
            }
        };

        let row = Event {
            id,
            source: event.source.clone(),
            external_event_id: event.external_event_id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            start_at: event.start_at,
            end_at: event.end_at,
            location: event.location.clone(),
            address: event.address.clone(),
            capacity: event.capacity,
            image_url: event.image_url.clone(),
            status: event.status,
            metadata: sqlx::types::Json(event.metadata.clone()),
            last_synced_at: event.synced_at,
        };
        tables.events.insert(key, row.clone());
        Ok(row)
    }

    async fn find_event(&self, key: &EventKey) -> StoreResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(key).cloned())
    }

    async fn find_events_by_external_id(&self, external_event_id: &str) -> StoreResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| event.external_event_id == external_event_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            b.last_synced_at
                .cmp(&a.last_synced_at)
                .then(a.id.cmp(&b.id))
        });
        Ok(events)
    }

    async fn delete_event(&self, key: &EventKey) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.events.remove(key) {
            Some(event) => {
                tables
                    .registrations
                    .retain(|_, registration| registration.event_id != event.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| event.start_at >= from && event.start_at < to)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.start_at, event.id));
        Ok(events)
    }

    async fn events_with_status(&self, statuses: &[EventStatus]) -> StoreResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| statuses.contains(&event.status))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.id);
        Ok(events)
    }

    async fn set_event_status(&self, event_id: i64, status: EventStatus) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(event) = tables.events.values_mut().find(|event| event.id == event_id) {
            event.status = status;
        }
        Ok(())
    }

    async fn count_events(&self) -> StoreResult<u64> {
        Ok(self.tables.lock().await.events.len() as u64)
    }

    async fn delete_events_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let expired: Vec<(EventKey, i64)> = tables
            .events
            .iter()
            .filter(|(_, event)| event.finished_at() < cutoff)
            .map(|(key, event)| (key.clone(), event.id))
            .collect();

        if !dry_run {
            for (key, id) in &expired {
                tables.events.remove(key);
                tables
                    .registrations
                    .retain(|_, registration| registration.event_id != *id);
            }
        }
        Ok(expired.len() as u64)
    }

    async fn upsert_registration(&self, registration: &NewRegistration) -> StoreResult<Registration> {
        let mut tables = self.tables.lock().await;
        let key = registration.key();

        let row = match tables.registrations.get(&key) {
            Some(existing) => Registration {
                event_id: registration.event_id,
                attendee_name: registration.attendee_name.clone(),
                email: registration.email.clone(),
                phone: registration.phone.clone(),
                tickets: TICKETS_PER_REGISTRATION,
                registered_at: registration.registered_at,
                metadata: sqlx::types::Json(registration.metadata.clone()),
                last_synced_at: registration.synced_at,
                ..existing.clone()
            },
            None => {
                tables.next_registration_id += 1;
                Registration {
                    id: tables.next_registration_id,
                    event_id: registration.event_id,
                    source: registration.source.clone(),
                    external_booking_id: registration.external_booking_id.clone(),
                    attendee_index: registration.attendee_index,
                    attendee_name: registration.attendee_name.clone(),
                    email: registration.email.clone(),
                    phone: registration.phone.clone(),
                    tickets: TICKETS_PER_REGISTRATION,
                    registered_at: registration.registered_at,
                    checked_in: false,
                    checked_in_at: None,
                    checked_in_by: None,
                    reminder_sent: false,
                    reminder_sent_at: None,
                    follow_up_sent: false,
                    follow_up_sent_at: None,
                    metadata: sqlx::types::Json(registration.metadata.clone()),
                    last_synced_at: registration.synced_at,
                }
            }
        };

        tables.registrations.insert(key, row.clone());
        Ok(row)
    }

    async fn find_registration(&self, key: &RegistrationKey) -> StoreResult<Option<Registration>> {
        Ok(self.tables.lock().await.registrations.get(key).cloned())
    }

    async fn registrations_for_event(&self, event_id: i64) -> StoreResult<Vec<Registration>> {
        let tables = self.tables.lock().await;
        let mut registrations: Vec<Registration> = tables
            .registrations
            .values()
            .filter(|registration| registration.event_id == event_id)
            .cloned()
            .collect();
        registrations.sort_by_key(|registration| registration.id);
        Ok(registrations)
    }

    async fn count_registrations(&self) -> StoreResult<u64> {
        Ok(self.tables.lock().await.registrations.len() as u64)
    }

    async fn delete_booking(&self, source: &SourceKey, external_booking_id: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.registrations.len();
        tables.registrations.retain(|key, _| {
            !(key.source == *source && key.external_booking_id == external_booking_id)
        });
        Ok((before - tables.registrations.len()) as u64)
    }

    async fn check_in(
        &self,
        key: &RegistrationKey,
        check_in: &CheckIn,
    ) -> StoreResult<Option<Registration>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.registrations.get_mut(key).map(|registration| {
            registration.checked_in = true;
            registration.checked_in_at = Some(check_in.at);
            registration.checked_in_by = check_in.operator.clone();
            registration.clone()
        }))
    }

    async fn pending_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| {
                event.status != EventStatus::Cancelled && event.start_at >= from && event.start_at < to
            })
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.start_at, event.id));
        Ok(tables.due(events, |registration| !registration.reminder_sent))
    }

    async fn pending_follow_ups(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| {
                let finished = event.finished_at();
                event.status == EventStatus::Completed && finished >= from && finished < to
            })
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.finished_at(), event.id));
        Ok(tables.due(events, |registration| !registration.follow_up_sent))
    }

    async fn mark_reminder_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(registration) = tables.registration_by_id(registration_id) {
            registration.reminder_sent = true;
            registration.reminder_sent_at = Some(at);
        }
        Ok(())
    }

    async fn mark_follow_up_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(registration) = tables.registration_by_id(registration_id) {
            registration.follow_up_sent = true;
            registration.follow_up_sent_at = Some(at);
        }
        Ok(())
    }
}
