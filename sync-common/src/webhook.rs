//! Single-record ingress pushed by upstream sites.
//!
//! A delivery is verified, parsed into a `WebhookEnvelope` and dispatched on
//! its `event_type` into the same reconcilers a bulk sync uses, so both paths
//! produce identical rows for identical input.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::WebhookError;
use crate::models::{CheckIn, EventKey, RegistrationKey};
use crate::payload;
use crate::reconcile::{BookingReconciler, EventReconciler, Tally};
use crate::source::SourceKey;
use crate::store::Store;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub site_url: Option<String>,
}

impl WebhookEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(body).map_err(WebhookError::InvalidEnvelope)
    }
}

/// Checks `X-Webhook-Signature`: the hex HMAC-SHA256 of the raw body, keyed with
/// the shared secret, optionally prefixed with `sha256=`.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    secret: Option<String>,
    require_signature: bool,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>, require_signature: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            require_signature,
        }
    }

    /// Without a configured secret nothing can be checked and every delivery
    /// is accepted. A delivery without a signature is accepted unless
    /// signatures are required.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return if self.require_signature {
                Err(WebhookError::MissingSignature)
            } else {
                Ok(())
            };
        };

        let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(hex_digest).map_err(|_| WebhookError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature)
    }
}

/// Hex HMAC-SHA256 of `body`, as upstream sites send it.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// What a delivery asks for, decided by its `event_type` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    UpsertEvent,
    DeleteEvent,
    UpsertBooking,
    DeleteBooking,
    CheckIn,
    Ignore,
}

impl WebhookAction {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "event.created" | "event.updated" | "event.published" => WebhookAction::UpsertEvent,
            "event.deleted" | "event.trashed" => WebhookAction::DeleteEvent,
            "booking.created" | "booking.updated" | "booking.approved" => {
                WebhookAction::UpsertBooking
            }
            "booking.cancelled" | "booking.deleted" => WebhookAction::DeleteBooking,
            "attendee.checked_in" | "booking.checked_in" => WebhookAction::CheckIn,
            _ => WebhookAction::Ignore,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            WebhookAction::UpsertEvent => "upsert_event",
            WebhookAction::DeleteEvent => "delete_event",
            WebhookAction::UpsertBooking => "upsert_booking",
            WebhookAction::DeleteBooking => "delete_booking",
            WebhookAction::CheckIn => "check_in",
            WebhookAction::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        events: Tally,
        registrations: Tally,
    },
    Deleted {
        events: u64,
        registrations: u64,
    },
    CheckedIn {
        registration_id: i64,
    },
    /// The record the delivery refers to does not exist locally.
    NotFound,
    Ignored {
        event_type: String,
    },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { events, registrations }
                if events.errors + registrations.errors > 0 =>
            {
                "partial"
            }
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Deleted { .. } => "deleted",
            WebhookOutcome::CheckedIn { .. } => "checked_in",
            WebhookOutcome::NotFound => "not_found",
            WebhookOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Route one verified delivery to the flow its `event_type` names.
///
/// Bookings describing more than `max_tickets` attendees are rejected whole.
pub async fn dispatch(
    store: &dyn Store,
    envelope: WebhookEnvelope,
    now: DateTime<Utc>,
    max_tickets: u32,
) -> Result<WebhookOutcome, WebhookError> {
    let WebhookEnvelope {
        event_type,
        data,
        site_url,
        ..
    } = envelope;
    let action = WebhookAction::from_event_type(&event_type);
    let source = || SourceKey::normalize(site_url.as_deref().unwrap_or_default());

    let outcome = match action {
        WebhookAction::Ignore => {
            info!(%event_type, "ignoring webhook");
            WebhookOutcome::Ignored {
                event_type: event_type.clone(),
            }
        }
        WebhookAction::UpsertEvent => WebhookOutcome::Processed {
            events: EventReconciler::new(store, &source()?)
                .reconcile_all(vec![data], now)
                .await,
            registrations: Tally::default(),
        },
        WebhookAction::UpsertBooking => WebhookOutcome::Processed {
            events: Tally::default(),
            registrations: BookingReconciler::new(store, &source()?)
                .max_tickets(max_tickets)
                .reconcile(data, now)
                .await,
        },
        WebhookAction::DeleteEvent => delete_event(store, source()?, &data).await?,
        WebhookAction::DeleteBooking => {
            let source = source()?;
            let booking_id = booking_id(&data)?;
            WebhookOutcome::Deleted {
                events: 0,
                registrations: store.delete_booking(&source, &booking_id).await?,
            }
        }
        WebhookAction::CheckIn => check_in(store, source()?, &data, now).await?,
    };

    // Unknown event types are unbounded, so they share one label value.
    let event_type_label = match action {
        WebhookAction::Ignore => "other".to_owned(),
        _ => event_type.clone(),
    };
    let labels = [
        ("event_type", event_type_label),
        ("outcome", outcome.label().to_owned()),
    ];
    metrics::counter!("webhook_requests_total", &labels).increment(1);
    debug!(%event_type, action = action.as_str(), outcome = outcome.label(), "processed webhook");

    Ok(outcome)
}

fn booking_id(data: &Value) -> Result<String, WebhookError> {
    data.as_object()
        .and_then(|data| payload::identifier(data, &["booking_id", "id"]))
        .ok_or(WebhookError::MissingField("booking_id"))
}

async fn delete_event(
    store: &dyn Store,
    source: SourceKey,
    data: &Value,
) -> Result<WebhookOutcome, WebhookError> {
    let external_event_id = data
        .as_object()
        .and_then(|data| payload::identifier(data, &["id", "event_id"]))
        .ok_or(WebhookError::MissingField("id"))?;
    let key = EventKey {
        source,
        external_event_id,
    };

    let Some(event) = store.find_event(&key).await? else {
        return Ok(WebhookOutcome::NotFound);
    };
    let registrations = store.registrations_for_event(event.id).await?.len() as u64;
    let deleted = store.delete_event(&key).await?;

    Ok(WebhookOutcome::Deleted {
        events: u64::from(deleted),
        registrations: if deleted { registrations } else { 0 },
    })
}

async fn check_in(
    store: &dyn Store,
    source: SourceKey,
    data: &Value,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, WebhookError> {
    let external_booking_id = booking_id(data)?;
    let fields = data.as_object();
    let attendee_index = fields
        .and_then(|data| payload::integer(data, &["attendee_index"]))
        .unwrap_or(0);
    let operator = fields.and_then(|data| payload::text(data, &["operator", "checked_in_by"]));

    let key = RegistrationKey {
        source,
        external_booking_id,
        attendee_index: i32::try_from(attendee_index)
            .map_err(|_| WebhookError::MissingField("attendee_index"))?,
    };
    let check_in = CheckIn { at: now, operator };

    Ok(match store.check_in(&key, &check_in).await? {
        Some(registration) => WebhookOutcome::CheckedIn {
            registration_id: registration.id,
        },
        None => WebhookOutcome::NotFound,
    })
}
