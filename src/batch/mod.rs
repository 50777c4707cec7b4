//! Daily batch aggregation.
//!
//! Selects completed trips from the store, reduces the ones dropped off on
//! the target date into a KPI record, writes it to the object store, and
//! marks the date processed so re-triggers are no-ops.

pub mod completion;
pub mod driver;
pub mod kpi;
pub mod state;
