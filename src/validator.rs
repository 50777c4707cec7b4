//! Required-field and type validation for incoming trip events.
//!
//! Pure and deterministic: the same event always yields the same verdict,
//! and nothing here touches storage. Rejections carry the reason that ends
//! up on the error record.

use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;

use crate::event::{EventType, TripEvent, parse_event_datetime};
use crate::store::TripFields;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("event payload is not a JSON object")]
    NotAnObject,
    #[error("missing or blank `type` field")]
    MissingType,
    #[error("missing or blank required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a parseable datetime: `{value}`")]
    BadDatetime { field: &'static str, value: String },
    #[error("field `{field}` must be a non-negative number")]
    BadNumber { field: &'static str },
}

/// A trip event that passed validation, reduced to its typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEvent {
    pub trip_id: String,
    pub event_type: EventType,
    pub fields: TripFields,
}

/// Validates a single event against the schema for its declared type.
pub fn validate(event: &TripEvent) -> Result<ValidEvent, ValidationError> {
    if !event.payload().is_object() {
        return Err(ValidationError::NotAnObject);
    }

    let trip_id = event
        .trip_id()
        .ok_or(ValidationError::MissingField("trip_id"))?
        .to_string();

    let event_type = event.event_type().ok_or(ValidationError::MissingType)?;

    for field in event_type.required_fields() {
        if event.field(field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }

    let fields = match event_type {
        EventType::Start => TripFields {
            pickup_location_id: Some(string_field(event, "pickup_location_id")),
            dropoff_location_id: Some(string_field(event, "dropoff_location_id")),
            vendor_id: Some(string_field(event, "vendor_id")),
            pickup_datetime: Some(datetime_field(event, "pickup_datetime")?),
            ..TripFields::default()
        },
        EventType::End => TripFields {
            dropoff_location_id: Some(string_field(event, "dropoff_location_id")),
            dropoff_datetime: Some(datetime_field(event, "dropoff_datetime")?),
            fare_amount: Some(amount_field(event, "fare_amount")?),
            payment_type: Some(string_field(event, "payment_type")),
            trip_distance: Some(amount_field(event, "trip_distance")?),
            ..TripFields::default()
        },
    };

    Ok(ValidEvent {
        trip_id,
        event_type,
        fields,
    })
}

/// Reads a field as a string. Numeric identifiers (vendor ids, location ids
/// from the source datasets) are stringified rather than rejected.
fn string_field(event: &TripEvent, field: &'static str) -> String {
    match event.field(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn datetime_field(
    event: &TripEvent,
    field: &'static str,
) -> Result<NaiveDateTime, ValidationError> {
    let value = event.field(field).ok_or(ValidationError::MissingField(field))?;

    let raw = match value {
        Value::String(s) => s.as_str(),
        _ => {
            return Err(ValidationError::BadDatetime {
                field,
                value: value.to_string(),
            });
        }
    };

    parse_event_datetime(raw).ok_or_else(|| ValidationError::BadDatetime {
        field,
        value: raw.to_string(),
    })
}

fn amount_field(event: &TripEvent, field: &'static str) -> Result<f64, ValidationError> {
    let value = event.field(field).ok_or(ValidationError::MissingField(field))?;

    let number = match value {
        Value::Number(n) => n.as_f64(),
        // Some producers quote numerics; accept them.
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n >= 0.0 && n.is_finite() => Ok(n),
        _ => Err(ValidationError::BadNumber { field }),
    }
}
