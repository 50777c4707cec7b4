//! Aggregation state: which dates have already been processed.
//!
//! A single small JSON document. Every batch invocation loads it, decides,
//! and writes it back; there is no hidden singleton. A present-but-corrupt
//! document must abort the invocation — treating it as "nothing processed
//! yet" would invite duplicate KPI writes without anyone noticing.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::output::{ObjectStore, write_json};

/// Object key of the state document.
pub const STATE_KEY: &str = "state/aggregation.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationState {
    pub processed_dates: BTreeSet<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AggregationState {
    pub fn is_processed(&self, date: NaiveDate) -> bool {
        self.processed_dates.contains(&date)
    }

    /// Records `date` as processed. Set semantics keep each date at most
    /// once; `last_updated` is refreshed on every call.
    pub fn mark_processed(&mut self, date: NaiveDate, timestamp: DateTime<Utc>) {
        self.processed_dates.insert(date);
        self.last_updated = Some(timestamp);
    }
}

/// Why the state document could not be loaded. Corruption is kept separate
/// so the driver can surface it loudly instead of folding it into a generic
/// step failure.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("aggregation state at `{key}` is unreadable: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("aggregation state backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Loads the state document. Absent means a fresh state (logged); present
/// but unparseable is [`StateError::Corrupt`].
pub async fn load_state(store: &dyn ObjectStore) -> Result<AggregationState, StateError> {
    match store.get(STATE_KEY).await.map_err(StateError::Backend)? {
        None => {
            info!(key = STATE_KEY, "No aggregation state yet, starting fresh");
            Ok(AggregationState::default())
        }
        Some(body) => serde_json::from_slice(&body).map_err(|source| StateError::Corrupt {
            key: STATE_KEY.to_string(),
            source,
        }),
    }
}

/// Writes the state document back, whole-object overwrite.
pub async fn save_state(store: &dyn ObjectStore, state: &AggregationState) -> Result<()> {
    write_json(store, STATE_KEY, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::local::LocalObjectStore;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    #[test]
    fn test_mark_and_query() {
        let mut state = AggregationState::default();
        assert!(!state.is_processed(date(13)));

        let now = Utc::now();
        state.mark_processed(date(13), now);
        assert!(state.is_processed(date(13)));
        assert_eq!(state.last_updated, Some(now));
    }

    #[test]
    fn test_marking_twice_keeps_date_once() {
        let mut state = AggregationState::default();
        state.mark_processed(date(13), Utc::now());
        state.mark_processed(date(13), Utc::now());
        assert_eq!(state.processed_dates.len(), 1);
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let mut state = AggregationState::default();
        state.mark_processed(date(13), Utc::now());
        save_state(&store, &state).await.unwrap();

        let loaded = load_state(&store).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_absent_state_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let loaded = load_state(&store).await.unwrap();
        assert_eq!(loaded, AggregationState::default());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put(STATE_KEY, b"][ garbage".to_vec()).await.unwrap();

        let err = load_state(&store).await.unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }
}
