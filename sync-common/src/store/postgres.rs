use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{DueNotification, Store};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    CheckIn, Event, EventKey, NewEvent, NewRegistration, Registration, RegistrationKey,
    TICKETS_PER_REGISTRATION,
};
use crate::source::SourceKey;
use crate::status::EventStatus;

/// A `Store` backed by the `events` and `attendee_registrations` tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |error| StoreError::QueryError {
        command: command.to_owned(),
        error,
    }
}

impl PgStore {
    /// Connect to PostgreSQL at `url` with a pool of at most `max_connections`.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the migrations shipped with the workspace.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn due_notifications(
        &self,
        events: Vec<Event>,
        pending_column: &str,
    ) -> StoreResult<Vec<DueNotification>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let event_ids: Vec<i64> = events.iter().map(|event| event.id).collect();
        let query = format!(
            r#"
SELECT * FROM attendee_registrations
WHERE event_id = ANY($1) AND NOT {pending_column}
ORDER BY id
            "#
        );
        let registrations: Vec<Registration> = sqlx::query_as(&query)
            .bind(&event_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))?;

        let mut by_event: HashMap<i64, Vec<Registration>> = HashMap::new();
        for registration in registrations {
            by_event
                .entry(registration.event_id)
                .or_default()
                .push(registration);
        }

        let mut due = Vec::new();
        for event in events {
            for registration in by_event.remove(&event.id).unwrap_or_default() {
                due.push(DueNotification {
                    event: event.clone(),
                    registration,
                });
            }
        }
        Ok(due)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_event(&self, event: &NewEvent) -> StoreResult<Event> {
        let base_query = r#"
INSERT INTO events
    (source, external_event_id, title, description, start_at, end_at, location, address, capacity, image_url, status, metadata, last_synced_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::event_status, $12, $13)
ON CONFLICT (source, external_event_id) DO UPDATE SET
    title = EXCLUDED.title,
    description = EXCLUDED.description,
    start_at = EXCLUDED.start_at,
    end_at = EXCLUDED.end_at,
    location = EXCLUDED.location,
    address = EXCLUDED.address,
    capacity = EXCLUDED.capacity,
    image_url = EXCLUDED.image_url,
    status = EXCLUDED.status,
    metadata = EXCLUDED.metadata,
    last_synced_at = EXCLUDED.last_synced_at
RETURNING *
        "#;

        sqlx::query_as(base_query)
            .bind(&event.source)
            .bind(&event.external_event_id)
            .bind(&event.title)
            .bind(&event.description)
            .bind(event.start_at)
            .bind(event.end_at)
            .bind(&event.location)
            .bind(&event.address)
            .bind(event.capacity)
            .bind(&event.image_url)
            .bind(event.status)
            .bind(sqlx::types::Json(&event.metadata))
            .bind(event.synced_at)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("INSERT"))
    }

    async fn find_event(&self, key: &EventKey) -> StoreResult<Option<Event>> {
        sqlx::query_as("SELECT * FROM events WHERE source = $1 AND external_event_id = $2")
            .bind(&key.source)
            .bind(&key.external_event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn find_events_by_external_id(&self, external_event_id: &str) -> StoreResult<Vec<Event>> {
        sqlx::query_as(
            "SELECT * FROM events WHERE external_event_id = $1 ORDER BY last_synced_at DESC, id ASC",
        )
        .bind(external_event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT"))
    }

    async fn delete_event(&self, key: &EventKey) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM events WHERE source = $1 AND external_event_id = $2")
            .bind(&key.source)
            .bind(&key.external_event_id)
            .execute(&self.pool)
            .await
            .map_err(query_error("DELETE"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        sqlx::query_as(
            "SELECT * FROM events WHERE start_at >= $1 AND start_at < $2 ORDER BY start_at, id",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT"))
    }

    async fn events_with_status(&self, statuses: &[EventStatus]) -> StoreResult<Vec<Event>> {
        let statuses: Vec<&str> = statuses.iter().map(EventStatus::as_str).collect();

        sqlx::query_as("SELECT * FROM events WHERE status::text = ANY($1) ORDER BY id")
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn set_event_status(&self, event_id: i64, status: EventStatus) -> StoreResult<()> {
        sqlx::query("UPDATE events SET status = $2::event_status WHERE id = $1")
            .bind(event_id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(query_error("UPDATE"))?;

        Ok(())
    }

    async fn count_events(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT"))?;

        Ok(count as u64)
    }

    async fn delete_events_finished_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> StoreResult<u64> {
        if dry_run {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM events WHERE COALESCE(end_at, start_at) < $1",
            )
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT"))?;

            return Ok(count as u64);
        }

        let result = sqlx::query("DELETE FROM events WHERE COALESCE(end_at, start_at) < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(query_error("DELETE"))?;

        Ok(result.rows_affected())
    }

    async fn upsert_registration(&self, registration: &NewRegistration) -> StoreResult<Registration> {
        // The check-in, reminder and follow-up columns are deliberately absent
        // from the update list.
        let base_query = r#"
INSERT INTO attendee_registrations
    (event_id, source, external_booking_id, attendee_index, attendee_name, email, phone, tickets, registered_at, metadata, last_synced_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT (source, external_booking_id, attendee_index) DO UPDATE SET
    event_id = EXCLUDED.event_id,
    attendee_name = EXCLUDED.attendee_name,
    email = EXCLUDED.email,
    phone = EXCLUDED.phone,
    tickets = EXCLUDED.tickets,
    registered_at = EXCLUDED.registered_at,
    metadata = EXCLUDED.metadata,
    last_synced_at = EXCLUDED.last_synced_at
RETURNING *
        "#;

        sqlx::query_as(base_query)
            .bind(registration.event_id)
            .bind(&registration.source)
            .bind(&registration.external_booking_id)
            .bind(registration.attendee_index)
            .bind(&registration.attendee_name)
            .bind(&registration.email)
            .bind(&registration.phone)
            .bind(TICKETS_PER_REGISTRATION)
            .bind(registration.registered_at)
            .bind(sqlx::types::Json(&registration.metadata))
            .bind(registration.synced_at)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("INSERT"))
    }

    async fn find_registration(&self, key: &RegistrationKey) -> StoreResult<Option<Registration>> {
        sqlx::query_as(
            r#"
SELECT * FROM attendee_registrations
WHERE source = $1 AND external_booking_id = $2 AND attendee_index = $3
            "#,
        )
        .bind(&key.source)
        .bind(&key.external_booking_id)
        .bind(key.attendee_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("SELECT"))
    }

    async fn registrations_for_event(&self, event_id: i64) -> StoreResult<Vec<Registration>> {
        sqlx::query_as("SELECT * FROM attendee_registrations WHERE event_id = $1 ORDER BY id")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn count_registrations(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendee_registrations")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT"))?;

        Ok(count as u64)
    }

    async fn delete_booking(&self, source: &SourceKey, external_booking_id: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM attendee_registrations WHERE source = $1 AND external_booking_id = $2",
        )
        .bind(source)
        .bind(external_booking_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("DELETE"))?;

        Ok(result.rows_affected())
    }

    async fn check_in(
        &self,
        key: &RegistrationKey,
        check_in: &CheckIn,
    ) -> StoreResult<Option<Registration>> {
        sqlx::query_as(
            r#"
UPDATE attendee_registrations
SET
    checked_in = TRUE,
    checked_in_at = $4,
    checked_in_by = $5
WHERE
    source = $1 AND external_booking_id = $2 AND attendee_index = $3
RETURNING *
            "#,
        )
        .bind(&key.source)
        .bind(&key.external_booking_id)
        .bind(key.attendee_index)
        .bind(check_in.at)
        .bind(&check_in.operator)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("UPDATE"))
    }

    async fn pending_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>> {
        let events: Vec<Event> = sqlx::query_as(
            r#"
SELECT * FROM events
WHERE start_at >= $1 AND start_at < $2 AND status <> 'cancelled'::event_status
ORDER BY start_at, id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT"))?;

        self.due_notifications(events, "reminder_sent").await
    }

    async fn pending_follow_ups(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DueNotification>> {
        let events: Vec<Event> = sqlx::query_as(
            r#"
SELECT * FROM events
WHERE
    COALESCE(end_at, start_at) >= $1
    AND COALESCE(end_at, start_at) < $2
    AND status = 'completed'::event_status
ORDER BY COALESCE(end_at, start_at), id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT"))?;

        self.due_notifications(events, "follow_up_sent").await
    }

    async fn mark_reminder_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE attendee_registrations SET reminder_sent = TRUE, reminder_sent_at = $2 WHERE id = $1",
        )
        .bind(registration_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(query_error("UPDATE"))?;

        Ok(())
    }

    async fn mark_follow_up_sent(&self, registration_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE attendee_registrations SET follow_up_sent = TRUE, follow_up_sent_at = $2 WHERE id = $1",
        )
        .bind(registration_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(query_error("UPDATE"))?;

        Ok(())
    }
}
