//! Trip lifecycle event reconciliation and daily KPI aggregation.
//!
//! Events (trip-start, trip-end) are validated and merged into per-trip
//! records with field-level last-write-wins semantics; a daily batch selects
//! fully completed trips, reduces them to per-date KPI records, and keeps an
//! idempotent processed-dates ledger.

pub mod batch;
pub mod event;
pub mod output;
pub mod processor;
pub mod simulator;
pub mod sink;
pub mod store;
pub mod validator;
