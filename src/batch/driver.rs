//! Daily batch driver.
//!
//! One invocation per triggered date: scan the trip store, keep completed
//! trips, reduce them to the day's KPI record, write it out, then mark the
//! date processed. Marking comes strictly last, so a crash anywhere before
//! it leaves the date unmarked and the next trigger retries the whole day.
//! That retry is safe because the KPI write is a whole-object overwrite.

use std::fmt;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::batch::completion::filter_completed;
use crate::batch::kpi::{KpiRecord, aggregate_date};
use crate::batch::state::{StateError, load_state, save_state};
use crate::output::{ObjectStore, kpi_key, write_json};
use crate::store::TripStore;

/// Pipeline phase, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Scanning,
    Filtering,
    Aggregating,
    Writing,
    Marking,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Scanning => "scanning",
            BatchPhase::Filtering => "filtering",
            BatchPhase::Aggregating => "aggregating",
            BatchPhase::Writing => "writing",
            BatchPhase::Marking => "marking",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// The state document exists but cannot be read. Never treated as
    /// "not yet processed".
    #[error(transparent)]
    StateCorruption(#[from] StateError),
    #[error("batch for {date} failed while {phase}: {source}")]
    Failed {
        date: NaiveDate,
        phase: BatchPhase,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The date was already marked processed and `force` was not set.
    Skipped,
    Completed(KpiRecord),
}

pub struct DailyBatchDriver<'a> {
    trips: &'a dyn TripStore,
    output: &'a dyn ObjectStore,
}

impl<'a> DailyBatchDriver<'a> {
    pub fn new(trips: &'a dyn TripStore, output: &'a dyn ObjectStore) -> Self {
        Self { trips, output }
    }

    /// Runs the batch for `date`. With `force`, an already-processed date is
    /// re-aggregated (the KPI write overwrites the previous object).
    #[tracing::instrument(skip(self), fields(date = %date, force))]
    pub async fn run(&self, date: NaiveDate, force: bool) -> Result<BatchOutcome, BatchError> {
        let mut state = match load_state(self.output).await {
            Ok(state) => state,
            Err(err) => {
                error!(error = %err, "Aggregation state unreadable, aborting batch");
                return Err(err.into());
            }
        };

        if state.is_processed(date) && !force {
            info!(date = %date, "Date already aggregated, skipping");
            return Ok(BatchOutcome::Skipped);
        }
        if state.is_processed(date) {
            warn!(date = %date, "Forced re-aggregation of a processed date");
        }

        let fail = |phase: BatchPhase, source: anyhow::Error| {
            error!(date = %date, %phase, error = %source, "Batch step failed");
            BatchError::Failed { date, phase, source }
        };

        let records = self
            .trips
            .scan()
            .await
            .map_err(|e| fail(BatchPhase::Scanning, e))?;
        info!(date = %date, records = records.len(), "Trip store scanned");

        let completed = filter_completed(records);
        info!(date = %date, completed = completed.len(), "Completed trips selected");

        let kpi = aggregate_date(date, &completed);
        info!(
            date = %date,
            count_trips = kpi.count_trips,
            total_fare = kpi.total_fare,
            "KPI aggregated"
        );

        let key = kpi_key(date);
        write_json(self.output, &key, &kpi)
            .await
            .map_err(|e| fail(BatchPhase::Writing, e))?;
        info!(date = %date, key, "KPI record written");

        // Only after the KPI record is durably written.
        state.mark_processed(date, Utc::now());
        save_state(self.output, &state)
            .await
            .map_err(|e| fail(BatchPhase::Marking, e))?;
        info!(date = %date, "Date marked processed");

        Ok(BatchOutcome::Completed(kpi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::state::STATE_KEY;
    use crate::output::local::LocalObjectStore;
    use crate::output::read_json;
    use crate::store::memory::MemoryTripStore;
    use crate::store::{TripFields, TripRecord};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    /// Object store whose KPI writes fail; state reads/writes pass through.
    struct KpiWriteFailure {
        inner: LocalObjectStore,
    }

    #[async_trait::async_trait]
    impl ObjectStore for KpiWriteFailure {
        async fn put(&self, key: &str, body: Vec<u8>) -> anyhow::Result<()> {
            if key.starts_with("kpi/") {
                anyhow::bail!("output store unreachable");
            }
            self.inner.put(key, body).await
        }

        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
    }

    async fn seeded_store(completed: usize, partial: usize) -> MemoryTripStore {
        let store = MemoryTripStore::new();
        let day = date(13);

        for i in 0..completed {
            let mut record = TripRecord::new(format!("C{i}"));
            record.apply(&TripFields {
                pickup_location_id: Some("A".into()),
                dropoff_location_id: Some("B".into()),
                vendor_id: Some("V1".into()),
                pickup_datetime: day.and_hms_opt(10, 0, 0),
                dropoff_datetime: day.and_hms_opt(10, 25, 0),
                fare_amount: Some(30.0),
                payment_type: Some("card".into()),
                trip_distance: Some(5.2),
            });
            store.store(record, None).await.unwrap();
        }

        for i in 0..partial {
            let mut record = TripRecord::new(format!("P{i}"));
            record.apply(&TripFields {
                pickup_location_id: Some("A".into()),
                vendor_id: Some("V1".into()),
                pickup_datetime: day.and_hms_opt(9, 0, 0),
                ..TripFields::default()
            });
            store.store(record, None).await.unwrap();
        }

        store
    }

    #[tokio::test]
    async fn test_batch_writes_kpi_and_marks_date() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalObjectStore::new(dir.path());
        let trips = seeded_store(2, 1).await;

        let driver = DailyBatchDriver::new(&trips, &output);
        let outcome = driver.run(date(13), false).await.unwrap();

        match outcome {
            BatchOutcome::Completed(kpi) => {
                assert_eq!(kpi.count_trips, 2);
                assert_eq!(kpi.total_fare, 60.0);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        let written: Option<KpiRecord> =
            read_json(&output, "kpi/2025/07/13/2025-07-13.json").await.unwrap();
        assert_eq!(written.unwrap().count_trips, 2);

        let state = load_state(&output).await.unwrap();
        assert!(state.is_processed(date(13)));
        assert!(state.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_second_run_skips_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalObjectStore::new(dir.path());
        let trips = seeded_store(1, 0).await;
        let driver = DailyBatchDriver::new(&trips, &output);

        driver.run(date(13), false).await.unwrap();
        let kpi_path = dir.path().join("kpi/2025/07/13/2025-07-13.json");
        let first_mtime = std::fs::metadata(&kpi_path).unwrap().modified().unwrap();

        let outcome = driver.run(date(13), false).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Skipped);

        let second_mtime = std::fs::metadata(&kpi_path).unwrap().modified().unwrap();
        assert_eq!(first_mtime, second_mtime);
    }

    #[tokio::test]
    async fn test_force_reaggregates_processed_date() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalObjectStore::new(dir.path());
        let trips = seeded_store(1, 0).await;
        let driver = DailyBatchDriver::new(&trips, &output);

        driver.run(date(13), false).await.unwrap();
        let outcome = driver.run(date(13), true).await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_zero_trip_date_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalObjectStore::new(dir.path());
        let trips = MemoryTripStore::new();
        let driver = DailyBatchDriver::new(&trips, &output);

        let outcome = driver.run(date(20), false).await.unwrap();
        match outcome {
            BatchOutcome::Completed(kpi) => {
                assert_eq!(kpi.count_trips, 0);
                assert_eq!(kpi.average_fare, None);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_kpi_write_leaves_date_unmarked() {
        let dir = tempfile::tempdir().unwrap();
        let output = KpiWriteFailure {
            inner: LocalObjectStore::new(dir.path()),
        };
        let trips = seeded_store(1, 0).await;
        let driver = DailyBatchDriver::new(&trips, &output);

        let err = driver.run(date(13), false).await.unwrap_err();
        match err {
            BatchError::Failed { phase, date: failed, .. } => {
                assert_eq!(phase, BatchPhase::Writing);
                assert_eq!(failed, date(13));
            }
            other => panic!("expected a writing failure, got {other:?}"),
        }

        // State untouched: the next trigger re-attempts the whole date.
        let state = load_state(&output).await.unwrap();
        assert!(!state.is_processed(date(13)));

        let retry = driver.run(date(13), false).await;
        assert!(matches!(retry, Err(BatchError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_corrupt_state_aborts_without_marking() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalObjectStore::new(dir.path());
        output.put(STATE_KEY, b"not json".to_vec()).await.unwrap();

        let trips = seeded_store(1, 0).await;
        let driver = DailyBatchDriver::new(&trips, &output);

        let err = driver.run(date(13), false).await.unwrap_err();
        assert!(matches!(err, BatchError::StateCorruption(_)));

        // No KPI object may appear after an aborted run.
        assert!(!dir.path().join("kpi").exists());
    }
}
