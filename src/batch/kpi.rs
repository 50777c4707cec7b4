//! Daily KPI reduction over completed trips.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::TripRecord;

/// Immutable daily aggregate. Statistical fields are omitted (not `NaN`,
/// not null-by-division) when no trips completed on the date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    pub date: NaiveDate,
    pub total_fare: f64,
    pub count_trips: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_fare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_trip_duration: Option<f64>,
}

/// Reduces the completed set to the KPI record for `date`.
///
/// Only trips whose dropoff falls on `date` are counted. The average
/// duration (whole minutes per trip, mean over trips) is present only when
/// every counted trip carries both timestamps.
pub fn aggregate_date(date: NaiveDate, completed: &[TripRecord]) -> KpiRecord {
    let counted: Vec<&TripRecord> = completed
        .iter()
        .filter(|r| r.dropoff_date() == Some(date))
        .collect();

    let count_trips = counted.len();
    if count_trips == 0 {
        return KpiRecord {
            date,
            total_fare: 0.0,
            count_trips: 0,
            average_fare: None,
            max_fare: None,
            min_fare: None,
            average_trip_duration: None,
        };
    }

    let fares: Vec<f64> = counted.iter().filter_map(|r| r.fare_amount).collect();
    let total_fare: f64 = fares.iter().sum();
    let max_fare = fares.iter().copied().fold(f64::MIN, f64::max);
    let min_fare = fares.iter().copied().fold(f64::MAX, f64::min);

    let durations: Vec<i64> = counted.iter().filter_map(|r| r.duration_minutes()).collect();
    let average_trip_duration = if durations.len() == count_trips {
        Some(durations.iter().sum::<i64>() as f64 / count_trips as f64)
    } else {
        None
    };

    KpiRecord {
        date,
        total_fare,
        count_trips,
        average_fare: Some(total_fare / count_trips as f64),
        max_fare: Some(max_fare),
        min_fare: Some(min_fare),
        average_trip_duration,
    }
}
