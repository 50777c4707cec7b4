//! Completed-trip selection.

use crate::store::TripRecord;

/// Keeps only records with every required field present. Pure selection,
/// nothing is mutated.
pub fn filter_completed(records: Vec<TripRecord>) -> Vec<TripRecord> {
    records.into_iter().filter(TripRecord::is_completed).collect()
}
