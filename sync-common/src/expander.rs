use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::RecordError;
use crate::payload::{Booker, BookingPayload, BookingShape};

/// One prospective registration row produced from a booking, before its event
/// has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendeeCandidate {
    pub external_booking_id: String,
    pub external_event_id: String,
    pub attendee_index: u32,
    pub attendee_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// Result of expanding one booking: the candidates to reconcile and the
/// attendees that were dropped on the way.
#[derive(Debug, Default)]
pub struct Expansion {
    pub candidates: Vec<AttendeeCandidate>,
    pub rejected: Vec<RecordError>,
}

impl Expansion {
    /// Every attendee slot the booking described, kept or not.
    pub fn seen(&self) -> usize {
        self.candidates.len() + self.rejected.len()
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.contains('@')
}

/// Upper bound for the attendees of one booking when nothing else is configured.
pub const DEFAULT_MAX_TICKETS_PER_BOOKING: u32 = 500;

/// Expand one booking into its attendee candidates.
///
/// A booking describing more than `max_tickets` attendees is rejected as a
/// whole, with a single error and no candidates.
///
/// `attendee_index` is the attendee's position in the upstream booking, so the
/// same booking always yields the same indices:
/// - structured bookings use each entry's position in the attendee list. Entries
///   with an invalid email are dropped without renumbering the ones after them.
/// - legacy bookings emit one candidate per ticket, `0..tickets`, all sharing the
///   booker's contact details. When there is more than one ticket each name gets
///   a `(Seat N)` suffix.
pub fn expand_booking(booking: &BookingPayload, max_tickets: u32) -> Expansion {
    let mut expansion = Expansion::default();

    let attendees = match &booking.shape {
        BookingShape::Structured(entries) => entries.len() as u64,
        BookingShape::Legacy(booker) => u64::from(booker.tickets),
    };
    if attendees > u64::from(max_tickets) {
        expansion.rejected.push(RecordError::TooManyTickets {
            booking_id: booking.booking_id.clone(),
            attendees,
            limit: max_tickets,
        });
        return expansion;
    }

    match &booking.shape {
        BookingShape::Structured(entries) => {
            let total = entries.len();
            for (position, entry) in entries.iter().enumerate() {
                let index = position as u32;
                if !is_valid_email(&entry.email) {
                    expansion.rejected.push(RecordError::InvalidEmail {
                        booking_id: booking.booking_id.clone(),
                        index,
                    });
                    continue;
                }
                expansion.candidates.push(candidate(
                    booking,
                    index,
                    total,
                    entry.name.clone(),
                    &entry.email,
                    entry.phone.clone(),
                ));
            }
        }
        BookingShape::Legacy(booker) => {
            if !is_valid_email(&booker.email) {
                expansion.rejected.push(RecordError::InvalidEmail {
                    booking_id: booking.booking_id.clone(),
                    index: 0,
                });
                return expansion;
            }
            let total = booker.tickets as usize;
            for index in 0..booker.tickets {
                expansion.candidates.push(candidate(
                    booking,
                    index,
                    total,
                    seat_name(booker, index),
                    &booker.email,
                    booker.phone.clone(),
                ));
            }
        }
    }

    expansion
}

fn seat_name(booker: &Booker, index: u32) -> String {
    if booker.tickets > 1 {
        format!("{} (Seat {})", booker.name, index + 1)
    } else {
        booker.name.clone()
    }
}

fn candidate(
    booking: &BookingPayload,
    index: u32,
    total: usize,
    attendee_name: String,
    email: &str,
    phone: Option<String>,
) -> AttendeeCandidate {
    AttendeeCandidate {
        external_booking_id: booking.booking_id.clone(),
        external_event_id: booking.external_event_id.clone(),
        attendee_index: index,
        attendee_name,
        email: email.trim().to_owned(),
        phone,
        registered_at: booking.registered_at,
        metadata: json!({
            "booking": booking.raw,
            "attendee_sequence_index": index,
            "total_attendees": total,
        }),
    }
}
