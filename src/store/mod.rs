//! Trip record storage.
//!
//! A trip record is the durable union of everything seen for one `trip_id`.
//! Backends implement [`TripStore`], a small keyed contract with versioned
//! conditional writes so that concurrent partial merges for the same trip
//! cannot silently overwrite each other. Records are created on the first
//! valid event and never deleted.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Partial field set carried by one validated event.
///
/// `None` means "not present on this event", never "clear the field".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripFields {
    pub pickup_location_id: Option<String>,
    pub dropoff_location_id: Option<String>,
    pub vendor_id: Option<String>,
    pub pickup_datetime: Option<NaiveDateTime>,
    pub dropoff_datetime: Option<NaiveDateTime>,
    pub fare_amount: Option<f64>,
    pub payment_type: Option<String>,
    pub trip_distance: Option<f64>,
}

/// Durable per-trip record: union of all fields seen for one trip id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff_location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_datetime: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff_datetime: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_distance: Option<f64>,
}

impl TripRecord {
    pub fn new(trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            pickup_location_id: None,
            dropoff_location_id: None,
            vendor_id: None,
            pickup_datetime: None,
            dropoff_datetime: None,
            fare_amount: None,
            payment_type: None,
            trip_distance: None,
        }
    }

    /// Field-level last-write-wins merge. Fields absent from `fields` are
    /// left untouched. Returns whether anything actually changed, so exact
    /// duplicate redelivery can skip the store write entirely.
    pub fn apply(&mut self, fields: &TripFields) -> bool {
        let mut changed = false;

        macro_rules! merge_field {
            ($name:ident) => {
                if let Some(value) = &fields.$name {
                    if self.$name.as_ref() != Some(value) {
                        self.$name = Some(value.clone());
                        changed = true;
                    }
                }
            };
        }

        merge_field!(pickup_location_id);
        merge_field!(dropoff_location_id);
        merge_field!(vendor_id);
        merge_field!(pickup_datetime);
        merge_field!(dropoff_datetime);
        merge_field!(fare_amount);
        merge_field!(payment_type);
        merge_field!(trip_distance);

        changed
    }

    /// A trip is completed once all nine fields are present.
    pub fn is_completed(&self) -> bool {
        self.pickup_location_id.is_some()
            && self.dropoff_location_id.is_some()
            && self.vendor_id.is_some()
            && self.pickup_datetime.is_some()
            && self.dropoff_datetime.is_some()
            && self.fare_amount.is_some()
            && self.payment_type.is_some()
            && self.trip_distance.is_some()
    }

    /// Trip duration in whole minutes, when both timestamps are present.
    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.pickup_datetime, self.dropoff_datetime) {
            (Some(pickup), Some(dropoff)) => Some((dropoff - pickup).num_minutes()),
            _ => None,
        }
    }

    /// Calendar date of the dropoff, used to bucket trips per KPI day.
    pub fn dropoff_date(&self) -> Option<NaiveDate> {
        self.dropoff_datetime.map(|dt| dt.date())
    }
}

/// A record together with its storage version token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub record: TripRecord,
    pub version: u64,
}

/// Conditional write failed: another writer got in between load and store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrent update on trip `{trip_id}`: expected version {expected}, found {actual}"
)]
pub struct MergeConflict {
    pub trip_id: String,
    /// Version the writer loaded; 0 means it expected the record to be absent.
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] MergeConflict),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Keyed trip record storage with optimistic concurrency.
///
/// `store` succeeds only when the record's current version matches
/// `expected` (`None` = must not exist yet); callers retry the whole
/// load/merge/store cycle on [`StoreError::Conflict`].
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn load(&self, trip_id: &str) -> anyhow::Result<Option<VersionedRecord>>;

    async fn store(&self, record: TripRecord, expected: Option<u64>) -> Result<(), StoreError>;

    /// Full scan for the daily batch. Order is unspecified.
    async fn scan(&self) -> anyhow::Result<Vec<TripRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 13)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn start_fields() -> TripFields {
        TripFields {
            pickup_location_id: Some("A".into()),
            dropoff_location_id: Some("B".into()),
            vendor_id: Some("V1".into()),
            pickup_datetime: Some(dt(10, 0)),
            ..TripFields::default()
        }
    }

    fn end_fields() -> TripFields {
        TripFields {
            dropoff_location_id: Some("B".into()),
            dropoff_datetime: Some(dt(10, 25)),
            fare_amount: Some(30.0),
            payment_type: Some("card".into()),
            trip_distance: Some(5.2),
            ..TripFields::default()
        }
    }

    #[test]
    fn test_merge_is_commutative_across_event_order() {
        let mut start_then_end = TripRecord::new("T1");
        start_then_end.apply(&start_fields());
        start_then_end.apply(&end_fields());

        let mut end_then_start = TripRecord::new("T1");
        end_then_start.apply(&end_fields());
        end_then_start.apply(&start_fields());

        assert_eq!(start_then_end, end_then_start);
        assert!(start_then_end.is_completed());
    }

    #[test]
    fn test_duplicate_apply_is_a_noop() {
        let mut record = TripRecord::new("T1");
        assert!(record.apply(&start_fields()));

        let snapshot = record.clone();
        assert!(!record.apply(&start_fields()));
        assert_eq!(record, snapshot);
    }

    #[test]
    fn test_incoming_fields_overwrite_existing() {
        let mut record = TripRecord::new("T1");
        record.apply(&end_fields());

        let corrected = TripFields {
            fare_amount: Some(32.5),
            ..TripFields::default()
        };
        assert!(record.apply(&corrected));
        assert_eq!(record.fare_amount, Some(32.5));
        // Untouched fields survive.
        assert_eq!(record.payment_type.as_deref(), Some("card"));
    }

    #[test]
    fn test_completion_requires_all_nine_fields() {
        let mut record = TripRecord::new("T1");
        assert!(!record.is_completed());

        record.apply(&start_fields());
        assert!(!record.is_completed());

        record.apply(&end_fields());
        assert!(record.is_completed());
    }

    #[test]
    fn test_duration_and_dropoff_date() {
        let mut record = TripRecord::new("T1");
        assert_eq!(record.duration_minutes(), None);

        record.apply(&start_fields());
        record.apply(&end_fields());
        assert_eq!(record.duration_minutes(), Some(25));
        assert_eq!(
            record.dropoff_date(),
            NaiveDate::from_ymd_opt(2025, 7, 13)
        );
    }
}
