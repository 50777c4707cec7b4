//! In-memory trip store.
//!
//! Reference backend for tests and single-invocation pipelines. The map is
//! guarded by an async `RwLock`; version checks happen under the write lock,
//! which is the serialization point the processor relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MergeConflict, StoreError, TripRecord, TripStore, VersionedRecord};

#[derive(Debug, Default)]
pub struct MemoryTripStore {
    records: RwLock<HashMap<String, VersionedRecord>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn load(&self, trip_id: &str) -> anyhow::Result<Option<VersionedRecord>> {
        Ok(self.records.read().await.get(trip_id).cloned())
    }

    async fn store(&self, record: TripRecord, expected: Option<u64>) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let current = records.get(&record.trip_id).map(|v| v.version);

        match (current, expected) {
            (None, None) => {
                records.insert(
                    record.trip_id.clone(),
                    VersionedRecord { record, version: 1 },
                );
                Ok(())
            }
            (Some(actual), Some(expected)) if actual == expected => {
                records.insert(
                    record.trip_id.clone(),
                    VersionedRecord {
                        record,
                        version: expected + 1,
                    },
                );
                Ok(())
            }
            (actual, expected) => Err(MergeConflict {
                trip_id: record.trip_id,
                expected: expected.unwrap_or(0),
                actual: actual.unwrap_or(0),
            }
            .into()),
        }
    }

    async fn scan(&self) -> anyhow::Result<Vec<TripRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|v| v.record.clone())
            .collect())
    }
}
