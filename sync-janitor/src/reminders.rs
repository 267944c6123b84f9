use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use sync_common::store::{DueNotification, Store};

use crate::cleanup::{Cleaner, CleanerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Reminder,
    FollowUp,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::FollowUp => "follow_up",
        }
    }
}

#[derive(Error, Debug)]
#[error("could not notify registration {registration_id}: {reason}")]
pub struct NotifyError {
    pub registration_id: i64,
    pub reason: String,
}

/// Delivers one notification to one attendee. Rendering and transport live
/// behind this seam.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, due: &DueNotification) -> Result<(), NotifyError>;
}

/// Records notifications in the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: NotificationKind, due: &DueNotification) -> Result<(), NotifyError> {
        info!(
            kind = kind.as_str(),
            registration_id = due.registration.id,
            email = %due.registration.email,
            event = %due.event.title,
            start_at = %due.event.start_at,
            "notification due"
        );
        Ok(())
    }
}

/// Sends reminders ahead of events and follow-ups after them.
///
/// A registration is marked sent only once the notifier accepted it, so a
/// failed delivery is retried on the next run. Only the reminder and
/// follow-up columns are written.
pub struct ReminderDispatcher {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    reminder_lead: Duration,
    follow_up_window: Duration,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        reminder_lead: Duration,
        follow_up_window: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            reminder_lead,
            follow_up_window,
        }
    }

    async fn deliver(
        &self,
        kind: NotificationKind,
        pending: Vec<DueNotification>,
        now: DateTime<Utc>,
    ) -> Result<u64, CleanerError> {
        let mut sent = 0;

        for due in pending {
            if let Err(e) = self.notifier.notify(kind, &due).await {
                metrics::counter!(
                    "janitor_notifications_total",
                    &[("kind", kind.as_str()), ("outcome", "failed")]
                )
                .increment(1);
                warn!(kind = kind.as_str(), "{}", e);
                continue;
            }

            match kind {
                NotificationKind::Reminder => {
                    self.store.mark_reminder_sent(due.registration.id, now).await?
                }
                NotificationKind::FollowUp => {
                    self.store
                        .mark_follow_up_sent(due.registration.id, now)
                        .await?
                }
            }
            metrics::counter!(
                "janitor_notifications_total",
                &[("kind", kind.as_str()), ("outcome", "sent")]
            )
            .increment(1);
            sent += 1;
        }

        Ok(sent)
    }
}

#[async_trait]
impl Cleaner for ReminderDispatcher {
    fn name(&self) -> &'static str {
        "reminders"
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, CleanerError> {
        let reminders = self
            .store
            .pending_reminders(
                now,
                now.checked_add_signed(self.reminder_lead)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            )
            .await?;
        let mut sent = self
            .deliver(NotificationKind::Reminder, reminders, now)
            .await?;

        let follow_ups = self
            .store
            .pending_follow_ups(
                now.checked_sub_signed(self.follow_up_window)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                now,
            )
            .await?;
        sent += self
            .deliver(NotificationKind::FollowUp, follow_ups, now)
            .await?;

        Ok(sent)
    }
}
