//! Event processor: validate, then merge or reject.
//!
//! Each event is handled independently; the trip store's versioned
//! conditional write is the serialization point for events racing on the
//! same trip id. Per event exactly one side effect happens: a store write
//! for valid events, an error-sink write for invalid ones.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::TripEvent;
use crate::sink::{ErrorRecord, ErrorSink};
use crate::store::{StoreError, TripRecord, TripStore};
use crate::validator::validate;

/// Bounded retries for the load/merge/store cycle under contention.
pub const DEFAULT_MERGE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event merged into the trip record. `changed` is false for exact
    /// duplicate redelivery, where no store write was needed.
    Merged { trip_id: String, completed: bool, changed: bool },
    /// The event failed validation and went to the error sink.
    Rejected { reason: String },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Contention on one trip id outlasted the retry budget. Transient:
    /// the transport's redelivery is expected to succeed eventually.
    #[error("merge conflict on trip `{trip_id}` persisted after {attempts} attempts")]
    RetriesExhausted { trip_id: String, attempts: usize },
    #[error("trip store backend failure: {0}")]
    Store(#[source] anyhow::Error),
    #[error("error sink write failed: {0}")]
    Sink(#[source] anyhow::Error),
}

pub struct EventProcessor<S, E> {
    trips: Arc<S>,
    errors: Arc<E>,
    max_merge_attempts: usize,
}

impl<S: TripStore, E: ErrorSink> EventProcessor<S, E> {
    pub fn new(trips: Arc<S>, errors: Arc<E>) -> Self {
        Self {
            trips,
            errors,
            max_merge_attempts: DEFAULT_MERGE_ATTEMPTS,
        }
    }

    pub fn with_merge_attempts(mut self, attempts: usize) -> Self {
        self.max_merge_attempts = attempts.max(1);
        self
    }

    /// Processes one event end to end.
    #[tracing::instrument(skip(self, event))]
    pub async fn process(&self, event: &TripEvent) -> Result<ProcessOutcome, ProcessError> {
        let valid = match validate(event) {
            Ok(valid) => valid,
            Err(reason) => {
                let trip_id = event.trip_id().map(str::to_string);
                warn!(trip_id = ?trip_id, %reason, "Event rejected");
                self.errors
                    .record(ErrorRecord::new(trip_id, reason.to_string(), event.payload()))
                    .await
                    .map_err(ProcessError::Sink)?;
                return Ok(ProcessOutcome::Rejected {
                    reason: reason.to_string(),
                });
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;

            let current = self
                .trips
                .load(&valid.trip_id)
                .await
                .map_err(ProcessError::Store)?;

            let (mut record, expected) = match current {
                Some(versioned) => (versioned.record, Some(versioned.version)),
                None => (TripRecord::new(valid.trip_id.clone()), None),
            };

            let changed = record.apply(&valid.fields);
            if !changed && expected.is_some() {
                // Exact duplicate redelivery: identical field values, no
                // write to issue.
                debug!(trip_id = %valid.trip_id, "Duplicate event, store untouched");
                return Ok(ProcessOutcome::Merged {
                    trip_id: valid.trip_id,
                    completed: record.is_completed(),
                    changed: false,
                });
            }

            let completed = record.is_completed();
            match self.trips.store(record, expected).await {
                Ok(()) => {
                    info!(
                        trip_id = %valid.trip_id,
                        event_type = valid.event_type.as_str(),
                        completed,
                        "Event merged"
                    );
                    return Ok(ProcessOutcome::Merged {
                        trip_id: valid.trip_id,
                        completed,
                        changed: true,
                    });
                }
                Err(StoreError::Conflict(conflict)) if attempts < self.max_merge_attempts => {
                    debug!(
                        trip_id = %conflict.trip_id,
                        attempt = attempts,
                        expected = conflict.expected,
                        actual = conflict.actual,
                        "Merge conflict, retrying"
                    );
                }
                Err(StoreError::Conflict(_)) => {
                    warn!(trip_id = %valid.trip_id, attempts, "Merge retries exhausted");
                    return Err(ProcessError::RetriesExhausted {
                        trip_id: valid.trip_id,
                        attempts,
                    });
                }
                Err(StoreError::Backend(err)) => return Err(ProcessError::Store(err)),
            }
        }
    }
}
