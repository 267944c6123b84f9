use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle status of an Event. Never stored as authoritative state: it is
/// re-derived by `derive_status` on every sync and on every status sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EventStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(EventStatus::Upcoming),
            "ongoing" => Ok(EventStatus::Ongoing),
            "completed" => Ok(EventStatus::Completed),
            "cancelled" => Ok(EventStatus::Cancelled),
            invalid => Err(StoreError::ParseEventStatusError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the upstream site still considers the event live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Published,
    /// Unpublished, drafted, trashed or explicitly cancelled upstream.
    Withdrawn,
}

/// Derive an Event's status. Bulk sync, webhooks and the periodic sweep all go
/// through here so the three paths can never disagree.
pub fn derive_status(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    publication: Publication,
) -> EventStatus {
    if publication == Publication::Withdrawn {
        return EventStatus::Cancelled;
    }

    match end {
        Some(end) if now > end => EventStatus::Completed,
        _ if now >= start => EventStatus::Ongoing,
        _ => EventStatus::Upcoming,
    }
}
