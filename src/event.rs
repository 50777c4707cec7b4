//! Trip lifecycle event envelope.
//!
//! Events arrive as loose JSON objects from the ingress transport. This
//! module keeps the raw payload intact (the error sink needs it verbatim)
//! and exposes typed accessors with the blank-value semantics the upstream
//! producers use: missing, JSON null, empty/whitespace strings, and the
//! literal string "null" all count as absent.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Naive timestamp format used on the wire, e.g. `2025-07-13T10:00:00`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    End,
}

impl EventType {
    /// Required fields for this event type, `trip_id` and `type` excluded.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EventType::Start => &[
                "pickup_location_id",
                "dropoff_location_id",
                "vendor_id",
                "pickup_datetime",
            ],
            EventType::End => &[
                "dropoff_location_id",
                "dropoff_datetime",
                "fare_amount",
                "payment_type",
                "trip_distance",
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::End => "end",
        }
    }
}

/// One trip lifecycle event as delivered by the transport.
///
/// Wraps the raw JSON payload; nothing here is validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TripEvent {
    payload: Value,
}

impl TripEvent {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Parses a single JSONL line into an event.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        Ok(Self {
            payload: serde_json::from_str(line)?,
        })
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the raw value for `name`, with blank values mapped to `None`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload
            .get(name)
            .filter(|v| !is_blank(v))
    }

    /// The declared event type, if present and recognised.
    pub fn event_type(&self) -> Option<EventType> {
        match self.field("type").and_then(Value::as_str) {
            Some("start") => Some(EventType::Start),
            Some("end") => Some(EventType::End),
            _ => None,
        }
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.field("trip_id").and_then(Value::as_str)
    }
}

/// Blank-value check matching the upstream producer convention.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty() || s == "null",
        _ => false,
    }
}

/// Parses a wire datetime: naive `YYYY-MM-DDTHH:MM:SS` first, then
/// RFC 3339 (normalised to UTC-naive), then the space-separated variant
/// some source datasets use.
pub fn parse_event_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_values() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!("")));
        assert!(is_blank(&json!("   ")));
        assert!(is_blank(&json!("null")));
        assert!(!is_blank(&json!("x")));
        assert!(!is_blank(&json!(0)));
        assert!(!is_blank(&json!(false)));
    }

    #[test]
    fn test_field_filters_blanks() {
        let event = TripEvent::new(json!({"trip_id": "  ", "vendor_id": "V1"}));
        assert!(event.field("trip_id").is_none());
        assert_eq!(event.field("vendor_id"), Some(&json!("V1")));
        assert!(event.field("absent").is_none());
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!(
            TripEvent::new(json!({"type": "start"})).event_type(),
            Some(EventType::Start)
        );
        assert_eq!(
            TripEvent::new(json!({"type": "end"})).event_type(),
            Some(EventType::End)
        );
        assert_eq!(TripEvent::new(json!({"type": "bogus"})).event_type(), None);
        assert_eq!(TripEvent::new(json!({})).event_type(), None);
    }

    #[test]
    fn test_parse_event_datetime_variants() {
        let expected = chrono::NaiveDate::from_ymd_opt(2025, 7, 13)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        assert_eq!(parse_event_datetime("2025-07-13T10:00:00"), Some(expected));
        assert_eq!(parse_event_datetime("2025-07-13 10:00:00"), Some(expected));
        assert_eq!(
            parse_event_datetime("2025-07-13T10:00:00+00:00"),
            Some(expected)
        );
        assert_eq!(parse_event_datetime("not a date"), None);
    }

    #[test]
    fn test_from_json_line() {
        let event = TripEvent::from_json_line(r#"{"type":"start","trip_id":"T1"}"#).unwrap();
        assert_eq!(event.trip_id(), Some("T1"));

        assert!(TripEvent::from_json_line("{broken").is_err());
    }
}
