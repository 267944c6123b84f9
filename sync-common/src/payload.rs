//! Decoding of upstream event and booking payloads.
//!
//! Upstream sites disagree on field names and types (ids as strings or numbers,
//! dates as a datetime, as date + time parts, or as a Unix timestamp). All of
//! that is resolved here, once, into plain types and tagged unions; nothing
//! downstream looks at raw JSON except to store it verbatim as metadata.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};

use crate::error::RecordError;
use crate::status::Publication;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

const WITHDRAWN_STATUSES: &[&str] = &[
    "draft",
    "pending",
    "private",
    "trash",
    "unpublished",
    "cancelled",
    "canceled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

/// Field names of every date convention we understand, for one boundary.
struct DateConventions {
    datetime: &'static [&'static str],
    parts: &'static [(&'static str, &'static str)],
    timestamp: &'static [&'static str],
}

impl Boundary {
    fn conventions(&self) -> DateConventions {
        match self {
            Boundary::Start => DateConventions {
                datetime: &["start", "start_datetime", "event_start"],
                parts: &[
                    ("start_date", "start_time"),
                    ("event_start_date", "event_start_time"),
                ],
                timestamp: &["start_timestamp", "event_start_timestamp"],
            },
            Boundary::End => DateConventions {
                datetime: &["end", "end_datetime", "event_end"],
                parts: &[
                    ("end_date", "end_time"),
                    ("event_end_date", "event_end_time"),
                ],
                timestamp: &["end_timestamp", "event_end_timestamp"],
            },
        }
    }
}

/// One candidate date found in a payload, in one of the supported conventions.
#[derive(Debug, Clone, PartialEq)]
pub enum DateField<'a> {
    DateTime(&'a str),
    Parts { date: &'a str, time: Option<&'a str> },
    Timestamp(&'a Value),
}

impl DateField<'_> {
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            DateField::DateTime(value) => parse_datetime(value),
            DateField::Parts { date, time } => {
                let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
                let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
                    Some(time) => TIME_FORMATS
                        .iter()
                        .find_map(|format| NaiveTime::parse_from_str(time, format).ok())?,
                    None => NaiveTime::MIN,
                };
                Some(date.and_time(time).and_utc())
            }
            DateField::Timestamp(value) => {
                let seconds = as_integer(value)?;
                DateTime::from_timestamp(seconds, 0)
            }
        }
    }
}

/// Collect every date candidate for `boundary` in precedence order: explicit
/// datetime fields, then date + time parts, then Unix timestamps.
pub fn date_fields(map: &Map<String, Value>, boundary: Boundary) -> Vec<DateField<'_>> {
    let conventions = boundary.conventions();
    let mut fields = Vec::new();

    for key in conventions.datetime {
        if let Some(value) = non_empty_str(map, key) {
            fields.push(DateField::DateTime(value));
        }
    }
    for (date_key, time_key) in conventions.parts {
        if let Some(date) = non_empty_str(map, date_key) {
            fields.push(DateField::Parts {
                date,
                time: non_empty_str(map, time_key),
            });
        }
    }
    for key in conventions.timestamp {
        if let Some(value) = map.get(*key).filter(|v| !v.is_null()) {
            fields.push(DateField::Timestamp(value));
        }
    }

    fields
}

/// The first candidate that parses wins. A present but unparseable field falls
/// through to the next convention.
pub fn resolve_date(map: &Map<String, Value>, boundary: Boundary) -> Option<DateTime<Utc>> {
    date_fields(map, boundary).iter().find_map(DateField::parse)
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Some(parsed) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// An upstream event, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: String,
    pub address: String,
    pub capacity: i32,
    pub image_url: Option<String>,
    pub publication: Publication,
    pub raw: Value,
}

impl EventPayload {
    pub fn decode(raw: Value) -> Result<Self, RecordError> {
        let map = raw.as_object().ok_or(RecordError::NotAnObject)?;

        let external_id = identifier(map, &["id", "event_id"]).ok_or(RecordError::MissingIdentifier)?;
        let location_object = map.get("location").and_then(Value::as_object);

        let location = text(map, &["location", "venue", "location_name"])
            .or_else(|| location_object.and_then(|l| text(l, &["name", "location_name"])))
            .unwrap_or_default();
        let address = match map.get("address") {
            Some(Value::Object(parts)) => join_address(parts),
            Some(_) => text(map, &["address"]).unwrap_or_default(),
            None => location_object.map(join_address).unwrap_or_default(),
        };
        let capacity = integer(map, &["capacity", "spaces", "event_spaces"])
            .map(|c| c.clamp(0, i64::from(i32::MAX)) as i32)
            .unwrap_or(0);
        let image_url = text(map, &["image_url", "image", "thumbnail", "featured_image"]).or_else(|| {
            ["image", "thumbnail", "featured_image"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_object))
                .find_map(|image| text(image, &["url"]))
        });

        Ok(Self {
            external_id,
            title: text(map, &["title", "name", "event_name"]).unwrap_or_default(),
            description: text(map, &["description", "content", "post_content"]).unwrap_or_default(),
            start: resolve_date(map, Boundary::Start),
            end: resolve_date(map, Boundary::End),
            location,
            address,
            capacity,
            image_url,
            publication: publication(map),
            raw,
        })
    }
}

/// Decode whether an upstream payload (or a stored metadata blob, which is the
/// same payload verbatim) is still published.
pub fn publication(map: &Map<String, Value>) -> Publication {
    if boolean(map, "published") == Some(false) || boolean(map, "cancelled") == Some(true) {
        return Publication::Withdrawn;
    }

    let withdrawn = ["status", "post_status", "event_status"]
        .iter()
        .filter_map(|key| non_empty_str(map, key))
        .any(|status| WITHDRAWN_STATUSES.contains(&status.trim().to_ascii_lowercase().as_str()));

    if withdrawn {
        Publication::Withdrawn
    } else {
        Publication::Published
    }
}

/// One attendee listed inside a multi-attendee booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeEntry {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// The person who booked, in bookings that carry no attendee list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booker {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub tickets: u32,
}

/// The two booking layouts. Any structured attendee entry makes a booking
/// `Structured`, whatever its ticket count says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingShape {
    Structured(Vec<AttendeeEntry>),
    Legacy(Booker),
}

/// An upstream booking, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingPayload {
    pub booking_id: String,
    pub external_event_id: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub shape: BookingShape,
    pub raw: Value,
}

impl BookingPayload {
    pub fn decode(raw: Value) -> Result<Self, RecordError> {
        let map = raw.as_object().ok_or(RecordError::NotAnObject)?;

        let booking_id = identifier(map, &["id", "booking_id"]).ok_or(RecordError::MissingIdentifier)?;
        let external_event_id = identifier(map, &["event_id"])
            .or_else(|| {
                map.get("event")
                    .and_then(Value::as_object)
                    .and_then(|event| identifier(event, &["id", "event_id"]))
            })
            .ok_or_else(|| RecordError::MissingEventReference {
                booking_id: booking_id.clone(),
            })?;

        let booking_phone = text(map, &["phone", "user_phone"]);
        let entries = map
            .get("attendees")
            .and_then(Value::as_array)
            .filter(|entries| !entries.is_empty());

        let shape = match entries {
            Some(entries) => BookingShape::Structured(
                entries
                    .iter()
                    .map(|entry| attendee_entry(entry, booking_phone.as_deref()))
                    .collect(),
            ),
            None => BookingShape::Legacy(Booker {
                name: person_name(map, &["name", "full_name", "user_name"]),
                email: text(map, &["email", "user_email"]).unwrap_or_default(),
                phone: booking_phone,
                tickets: integer(map, &["tickets", "ticket_count", "spaces", "seats"])
                    .map(|t| u32::try_from(t.max(1)).unwrap_or(u32::MAX))
                    .unwrap_or(1),
            }),
        };

        let registered_at = ["booking_date", "created_at", "date"]
            .iter()
            .filter_map(|key| non_empty_str(map, key))
            .find_map(parse_datetime);

        Ok(Self {
            booking_id,
            external_event_id,
            registered_at,
            shape,
            raw,
        })
    }
}

fn attendee_entry(entry: &Value, booking_phone: Option<&str>) -> AttendeeEntry {
    let Some(map) = entry.as_object() else {
        return AttendeeEntry {
            name: String::new(),
            email: String::new(),
            phone: None,
        };
    };

    AttendeeEntry {
        name: person_name(map, &["name", "full_name"]),
        email: text(map, &["email"]).unwrap_or_default(),
        phone: text(map, &["phone"]).or_else(|| booking_phone.map(str::to_owned)),
    }
}

/// Prefer an explicit full name, else join first and last names.
fn person_name(map: &Map<String, Value>, full_name_keys: &[&str]) -> String {
    if let Some(name) = text(map, full_name_keys) {
        return name;
    }
    let first = text(map, &["first_name"]).unwrap_or_default();
    let last = text(map, &["last_name"]).unwrap_or_default();
    format!("{first} {last}").trim().to_owned()
}

fn join_address(parts: &Map<String, Value>) -> String {
    ["address", "town", "city", "state", "postcode", "country"]
        .iter()
        .filter_map(|key| text(parts, &[*key]))
        .collect::<Vec<_>>()
        .join(", ")
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// First non-empty scalar among `keys`, as trimmed text.
pub(crate) fn text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Identifiers arrive as strings or integers; both compare as strings.
pub(crate) fn identifier(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        _ => None,
    })
}

pub(crate) fn integer(map: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| as_integer(map.get(*key)?))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn boolean(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn start_of(payload: Value) -> Option<DateTime<Utc>> {
        resolve_date(payload.as_object().unwrap(), Boundary::Start)
    }

    #[test]
    fn test_explicit_datetime_wins() {
        let payload = json!({
            "start": "2024-06-01T18:00:00+02:00",
            "start_date": "2024-01-01",
            "start_timestamp": 0,
        });
        assert_eq!(start_of(payload), Some(utc("2024-06-01T16:00:00Z")));
    }

    #[test]
    fn test_naive_datetime_is_utc() {
        let payload = json!({"event_start": "2024-06-01 18:30:00"});
        assert_eq!(start_of(payload), Some(utc("2024-06-01T18:30:00Z")));
    }

    #[test]
    fn test_unparseable_datetime_falls_through_to_parts() {
        let payload = json!({
            "start": "0000-00-00 00:00:00",
            "start_date": "2024-06-01",
            "start_time": "09:15",
        });
        assert_eq!(start_of(payload), Some(utc("2024-06-01T09:15:00Z")));
    }

    #[test]
    fn test_date_without_time_is_midnight() {
        let payload = json!({"event_start_date": "2024-06-01"});
        assert_eq!(start_of(payload), Some(utc("2024-06-01T00:00:00Z")));
    }

    #[test]
    fn test_timestamp_is_the_last_resort() {
        let payload = json!({"start_date": "tomorrow", "start_timestamp": "1717264800"});
        assert_eq!(start_of(payload), Some(utc("2024-06-01T18:00:00Z")));
    }

    #[test]
    fn test_no_start_date() {
        assert_eq!(start_of(json!({"title": "No date"})), None);
        assert_eq!(start_of(json!({"start": "", "start_timestamp": null})), None);
    }

    #[test]
    fn test_date_fields_precedence_order() {
        let payload = json!({
            "start_timestamp": 1,
            "start_date": "2024-06-01",
            "start": "2024-06-01T00:00:00Z",
        });
        let fields = date_fields(payload.as_object().unwrap(), Boundary::Start);
        assert!(matches!(fields[0], DateField::DateTime(_)));
        assert!(matches!(fields[1], DateField::Parts { .. }));
        assert!(matches!(fields[2], DateField::Timestamp(_)));
    }

    #[test]
    fn test_decode_event() {
        let payload = json!({
            "id": 42,
            "title": " Summer Gala ",
            "content": "Dinner and dancing",
            "start_date": "2024-06-01",
            "start_time": "18:00:00",
            "end_timestamp": 1717286400,
            "location": {"name": "Town Hall", "address": "1 Main St", "town": "Springfield"},
            "spaces": "120",
            "image": {"url": "https://img.example.com/gala.png"},
            "status": "publish",
        });

        let event = EventPayload::decode(payload.clone()).unwrap();

        assert_eq!(event.external_id, "42");
        assert_eq!(event.title, "Summer Gala");
        assert_eq!(event.description, "Dinner and dancing");
        assert_eq!(event.start, Some(utc("2024-06-01T18:00:00Z")));
        assert_eq!(event.end, Some(utc("2024-06-02T00:00:00Z")));
        assert_eq!(event.location, "Town Hall");
        assert_eq!(event.address, "1 Main St, Springfield");
        assert_eq!(event.capacity, 120);
        assert_eq!(event.image_url.as_deref(), Some("https://img.example.com/gala.png"));
        assert_eq!(event.publication, Publication::Published);
        assert_eq!(event.raw, payload);
    }

    #[test]
    fn test_decode_event_requires_identifier() {
        assert!(matches!(
            EventPayload::decode(json!({"title": "x"})),
            Err(RecordError::MissingIdentifier)
        ));
        assert!(matches!(
            EventPayload::decode(json!(["not", "an", "object"])),
            Err(RecordError::NotAnObject)
        ));
    }

    #[test]
    fn test_negative_capacity_is_zero() {
        let event = EventPayload::decode(json!({"id": "1", "capacity": -5})).unwrap();
        assert_eq!(event.capacity, 0);
    }

    #[test]
    fn test_publication() {
        let decode = |v: Value| publication(v.as_object().unwrap());

        assert_eq!(decode(json!({})), Publication::Published);
        assert_eq!(decode(json!({"status": "publish"})), Publication::Published);
        assert_eq!(decode(json!({"status": "Draft"})), Publication::Withdrawn);
        assert_eq!(decode(json!({"post_status": "trash"})), Publication::Withdrawn);
        assert_eq!(decode(json!({"published": false})), Publication::Withdrawn);
        assert_eq!(decode(json!({"published": "0"})), Publication::Withdrawn);
        assert_eq!(decode(json!({"cancelled": true})), Publication::Withdrawn);
        assert_eq!(decode(json!({"cancelled": false})), Publication::Published);
    }

    #[test]
    fn test_decode_structured_booking() {
        let payload = json!({
            "booking_id": "b-1",
            "event_id": 7,
            "phone": "555-0100",
            "tickets": 5,
            "attendees": [
                {"full_name": "Ada Lovelace", "email": "ada@example.com"},
                {"first_name": " Alan ", "last_name": "Turing", "email": "alan@example.com", "phone": "555-0199"},
            ],
            "booking_date": "2024-05-01 10:00:00",
        });

        let booking = BookingPayload::decode(payload).unwrap();

        assert_eq!(booking.booking_id, "b-1");
        assert_eq!(booking.external_event_id, "7");
        assert_eq!(booking.registered_at, Some(utc("2024-05-01T10:00:00Z")));
        assert_eq!(
            booking.shape,
            BookingShape::Structured(vec![
                AttendeeEntry {
                    name: "Ada Lovelace".to_owned(),
                    email: "ada@example.com".to_owned(),
                    phone: Some("555-0100".to_owned()),
                },
                AttendeeEntry {
                    name: "Alan Turing".to_owned(),
                    email: "alan@example.com".to_owned(),
                    phone: Some("555-0199".to_owned()),
                },
            ])
        );
    }

    #[test]
    fn test_decode_legacy_booking() {
        let payload = json!({
            "id": 9,
            "event": {"id": "e-3"},
            "first_name": "Jane",
            "last_name": "Doe",
            "email": "jane@example.com",
            "ticket_count": "3",
            "attendees": [],
        });

        let booking = BookingPayload::decode(payload).unwrap();

        assert_eq!(booking.external_event_id, "e-3");
        assert_eq!(booking.registered_at, None);
        assert_eq!(
            booking.shape,
            BookingShape::Legacy(Booker {
                name: "Jane Doe".to_owned(),
                email: "jane@example.com".to_owned(),
                phone: None,
                tickets: 3,
            })
        );
    }

    #[test]
    fn test_legacy_ticket_count_is_at_least_one() {
        for tickets in [json!(0), json!(-2), json!("many"), Value::Null] {
            let booking = BookingPayload::decode(json!({
                "id": 1, "event_id": 1, "email": "a@b.c", "tickets": tickets,
            }))
            .unwrap();
            match booking.shape {
                BookingShape::Legacy(booker) => assert_eq!(booker.tickets, 1),
                BookingShape::Structured(_) => panic!("expected a legacy booking"),
            }
        }
    }

    #[test]
    fn test_booking_without_event_reference() {
        assert!(matches!(
            BookingPayload::decode(json!({"id": 1, "email": "a@b.c"})),
            Err(RecordError::MissingEventReference { .. })
        ));
    }
}
