//! Trip event simulator.
//!
//! Replays a historical trips CSV as a stream of lifecycle events: each row
//! becomes one start and one end event, the whole batch is shuffled to mimic
//! out-of-order delivery, and configurable fractions of events are
//! duplicated (at-least-once redelivery) or get a required field blanked
//! (producer bugs, exercised by the validator).

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::event::{DATETIME_FORMAT, EventType, parse_event_datetime};

/// One row of the source dataset. Aliases cover the NYC taxi column names.
#[derive(Debug, Deserialize)]
struct TripRow {
    #[serde(default)]
    trip_id: Option<String>,
    #[serde(alias = "VendorID")]
    vendor_id: String,
    #[serde(alias = "tpep_pickup_datetime")]
    pickup_datetime: String,
    #[serde(alias = "tpep_dropoff_datetime")]
    dropoff_datetime: String,
    #[serde(alias = "PULocationID")]
    pickup_location_id: String,
    #[serde(alias = "DOLocationID")]
    dropoff_location_id: String,
    payment_type: String,
    fare_amount: f64,
    trip_distance: f64,
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Fraction of events emitted a second time, verbatim.
    pub duplicate_fraction: f64,
    /// Fraction of events with one required field blanked out.
    pub corrupt_fraction: f64,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            duplicate_fraction: 0.05,
            corrupt_fraction: 0.05,
            seed: None,
        }
    }
}

/// Reads the trips CSV and produces the shuffled event batch.
#[tracing::instrument(skip(config), fields(csv_path = %csv_path.as_ref().display()))]
pub fn simulate_events(csv_path: impl AsRef<Path>, config: &SimulatorConfig) -> Result<Vec<Value>> {
    let file = std::fs::File::open(csv_path.as_ref())
        .with_context(|| format!("opening trips CSV {}", csv_path.as_ref().display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut events = Vec::new();
    let mut row_count = 0usize;

    for (index, result) in reader.deserialize().enumerate() {
        let row: TripRow = result.context("reading trips CSV row")?;
        row_count += 1;

        let trip_id = row
            .trip_id
            .clone()
            .unwrap_or_else(|| format!("trip-{index:06}"));

        events.push(json!({
            "type": "start",
            "trip_id": trip_id,
            "pickup_location_id": row.pickup_location_id,
            "dropoff_location_id": row.dropoff_location_id,
            "vendor_id": row.vendor_id,
            "pickup_datetime": normalize_datetime(&row.pickup_datetime),
        }));
        events.push(json!({
            "type": "end",
            "trip_id": trip_id,
            "dropoff_location_id": row.dropoff_location_id,
            "dropoff_datetime": normalize_datetime(&row.dropoff_datetime),
            "fare_amount": row.fare_amount,
            "payment_type": row.payment_type,
            "trip_distance": row.trip_distance,
        }));
    }

    let corrupt_fraction = config.corrupt_fraction.clamp(0.0, 1.0);
    for event in &mut events {
        if corrupt_fraction > 0.0 && rng.random_bool(corrupt_fraction) {
            corrupt_event(event, &mut rng);
        }
    }

    let duplicate_fraction = config.duplicate_fraction.clamp(0.0, 1.0);
    let mut duplicates = Vec::new();
    for event in &events {
        if duplicate_fraction > 0.0 && rng.random_bool(duplicate_fraction) {
            duplicates.push(event.clone());
        }
    }
    events.extend(duplicates);

    events.shuffle(&mut rng);

    info!(
        rows = row_count,
        events = events.len(),
        "Simulated event batch ready"
    );
    Ok(events)
}

/// Writes events one JSON object per line.
pub fn write_jsonl(path: impl AsRef<Path>, events: &[Value]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path.as_ref())
        .with_context(|| format!("creating {}", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);

    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Source datasets use `YYYY-MM-DD HH:MM:SS`; the wire format wants a `T`.
fn normalize_datetime(raw: &str) -> String {
    match parse_event_datetime(raw) {
        Some(dt) => format_datetime(dt),
        None => raw.to_string(),
    }
}

fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Blanks one randomly chosen required field for the event's type.
fn corrupt_event(event: &mut Value, rng: &mut StdRng) {
    let event_type = match event.get("type").and_then(Value::as_str) {
        Some("start") => EventType::Start,
        Some("end") => EventType::End,
        _ => return,
    };

    let fields = event_type.required_fields();
    let field = fields[rng.random_range(0..fields.len())];
    event[field] = json!("");
}
