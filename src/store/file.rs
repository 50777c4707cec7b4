//! JSON-file-backed trip store.
//!
//! Durable variant for CLI use: `ingest` invocations accumulate records in a
//! single JSON document that a later `run-batch` invocation scans. The whole
//! map lives in memory behind a write lock and is flushed after every
//! successful conditional write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{MergeConflict, StoreError, TripRecord, TripStore, VersionedRecord};

pub struct JsonFileTripStore {
    path: PathBuf,
    records: RwLock<HashMap<String, VersionedRecord>>,
}

impl JsonFileTripStore {
    /// Opens the store at `path`, loading any existing document. A missing
    /// file starts empty; an unreadable one is an error rather than silent
    /// data loss.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let records = if path.exists() {
            let content = std::fs::read(&path)
                .with_context(|| format!("reading trip store {}", path.display()))?;
            serde_json::from_slice(&content)
                .with_context(|| format!("parsing trip store {}", path.display()))?
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), "Trip store opened");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn flush(&self, records: &HashMap<String, VersionedRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(records)?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("writing trip store {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TripStore for JsonFileTripStore {
    async fn load(&self, trip_id: &str) -> Result<Option<VersionedRecord>> {
        Ok(self.records.read().await.get(trip_id).cloned())
    }

    async fn store(&self, record: TripRecord, expected: Option<u64>) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let current = records.get(&record.trip_id).map(|v| v.version);

        let next = match (current, expected) {
            (None, None) => 1,
            (Some(actual), Some(expected)) if actual == expected => expected + 1,
            (actual, expected) => {
                return Err(MergeConflict {
                    trip_id: record.trip_id,
                    expected: expected.unwrap_or(0),
                    actual: actual.unwrap_or(0),
                }
                .into());
            }
        };

        records.insert(
            record.trip_id.clone(),
            VersionedRecord {
                record,
                version: next,
            },
        );
        self.flush(&records).map_err(StoreError::Backend)
    }

    async fn scan(&self) -> Result<Vec<TripRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|v| v.record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trips.json");

        {
            let store = JsonFileTripStore::open(&path).unwrap();
            store.store(TripRecord::new("T1"), None).await.unwrap();
        }

        let reopened = JsonFileTripStore::open(&path).unwrap();
        let loaded = reopened.load("T1").await.unwrap().unwrap();
        assert_eq!(loaded.record.trip_id, "T1");
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTripStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.scan().await.unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trips.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(JsonFileTripStore::open(&path).is_err());
    }

    #[tokio::test]
    async fn test_conflict_on_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTripStore::open(dir.path().join("trips.json")).unwrap();

        store.store(TripRecord::new("T1"), None).await.unwrap();
        let v1 = store.load("T1").await.unwrap().unwrap();
        store.store(v1.record.clone(), Some(v1.version)).await.unwrap();

        let err = store.store(v1.record, Some(v1.version)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
