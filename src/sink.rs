//! Append-only sink for rejected events.
//!
//! Rejection is fire-and-forget from the producer's point of view; the sink
//! is the only place a bad event remains visible. The CSV variant appends a
//! row per rejection, writing the header only when creating the file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// One rejected event: the verbatim payload plus why and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub trip_id: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Original event payload, serialized as a JSON string.
    pub payload: String,
}

impl ErrorRecord {
    pub fn new(trip_id: Option<String>, reason: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self {
            trip_id,
            reason: reason.into(),
            timestamp: Utc::now(),
            payload: payload.to_string(),
        }
    }
}

#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn record(&self, record: ErrorRecord) -> Result<()>;
}

/// CSV append-file sink. One row per rejected event.
pub struct CsvErrorSink {
    path: PathBuf,
    // Serializes appends so concurrent rejections cannot interleave rows.
    lock: Mutex<()>,
}

impl CsvErrorSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &ErrorRecord) -> Result<()> {
        let file_exists = self.path.exists();
        debug!(path = %self.path.display(), file_exists, "Appending error record");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_exists) // IMPORTANT when appending
            .from_writer(file);

        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}

#[async_trait]
impl ErrorSink for CsvErrorSink {
    async fn record(&self, record: ErrorRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.append(&record)
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryErrorSink {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn record(&self, record: ErrorRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
