use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::SourceKey;
use crate::status::EventStatus;

/// Every persisted registration row stands for exactly one ticket.
pub const TICKETS_PER_REGISTRATION: i32 = 1;

/// Natural key of an Event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub source: SourceKey,
    pub external_event_id: String,
}

/// Natural key of an Attendee Registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    pub source: SourceKey,
    pub external_booking_id: String,
    pub attendee_index: i32,
}

/// A persisted Event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub source: SourceKey,
    pub external_event_id: String,
    pub title: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
    pub address: String,
    pub capacity: i32,
    pub image_url: Option<String>,
    pub status: EventStatus,
    pub metadata: sqlx::types::Json<Value>,
    pub last_synced_at: DateTime<Utc>,
}

impl Event {
    pub fn key(&self) -> EventKey {
        EventKey {
            source: self.source.clone(),
            external_event_id: self.external_event_id.clone(),
        }
    }

    /// The date used by age-based cleanup: the end date, or the start date for
    /// events without one.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.end_at.unwrap_or(self.start_at)
    }
}

/// Every non-key field of an Event as derived from one upstream payload.
/// Upserting a `NewEvent` overwrites all of these unconditionally.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub source: SourceKey,
    pub external_event_id: String,
    pub title: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
    pub address: String,
    pub capacity: i32,
    pub image_url: Option<String>,
    pub status: EventStatus,
    pub metadata: Value,
    pub synced_at: DateTime<Utc>,
}

impl NewEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            source: self.source.clone(),
            external_event_id: self.external_event_id.clone(),
        }
    }
}

/// A persisted Attendee Registration.
///
/// The check-in, reminder and follow-up columns belong to the operational flows
/// and are never written by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Registration {
    pub id: i64,
    pub event_id: i64,
    pub source: SourceKey,
    pub external_booking_id: String,
    pub attendee_index: i32,
    pub attendee_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub tickets: i32,
    pub registered_at: Option<DateTime<Utc>>,
    pub checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_in_by: Option<String>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub follow_up_sent: bool,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub metadata: sqlx::types::Json<Value>,
    pub last_synced_at: DateTime<Utc>,
}

impl Registration {
    pub fn key(&self) -> RegistrationKey {
        RegistrationKey {
            source: self.source.clone(),
            external_booking_id: self.external_booking_id.clone(),
            attendee_index: self.attendee_index,
        }
    }
}

/// The reconciler-owned fields of a registration, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    pub event_id: i64,
    pub source: SourceKey,
    pub external_booking_id: String,
    pub attendee_index: i32,
    pub attendee_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub synced_at: DateTime<Utc>,
}

impl NewRegistration {
    pub fn key(&self) -> RegistrationKey {
        RegistrationKey {
            source: self.source.clone(),
            external_booking_id: self.external_booking_id.clone(),
            attendee_index: self.attendee_index,
        }
    }
}

/// Who checked an attendee in, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    pub at: DateTime<Utc>,
    pub operator: Option<String>,
}
