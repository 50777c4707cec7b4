//! Object storage for batch outputs.
//!
//! The KPI records and the aggregation-state document both live in a small
//! object store addressed by key. Writes are whole-object overwrites, which
//! is what makes batch retries for an already-written date safe.

pub mod local;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whole-object overwrite with `application/json` content.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Returns `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Serializes `value` and uploads it under `key`.
pub async fn write_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    store.put(key, body).await
}

/// Fetches and deserializes the object at `key`, if present.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
        None => Ok(None),
    }
}

/// Key convention for daily KPI records: `kpi/YYYY/MM/DD/YYYY-MM-DD.json`.
pub fn kpi_key(date: NaiveDate) -> String {
    format!(
        "kpi/{:04}/{:02}/{:02}/{}.json",
        date.year(),
        date.month(),
        date.day(),
        date.format("%Y-%m-%d")
    )
}
