//! CLI entry point for the trip KPI pipeline.
//!
//! Provides subcommands for simulating a trip event stream from a source
//! dataset, ingesting events into the trip record store, and running the
//! daily KPI batch.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::Instrument;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use trip_kpi::batch::driver::{BatchOutcome, DailyBatchDriver};
use trip_kpi::event::TripEvent;
use trip_kpi::output::local::LocalObjectStore;
use trip_kpi::output::s3::S3ObjectStore;
use trip_kpi::output::{ObjectStore, kpi_key};
use trip_kpi::processor::{EventProcessor, ProcessOutcome};
use trip_kpi::simulator::{SimulatorConfig, simulate_events, write_jsonl};
use trip_kpi::sink::CsvErrorSink;
use trip_kpi::store::file::JsonFileTripStore;

#[derive(Parser)]
#[command(name = "trip_kpi")]
#[command(about = "Trip event reconciliation and daily KPI aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trips CSV as a shuffled JSONL event stream
    Simulate {
        /// Source trips CSV
        #[arg(value_name = "TRIPS_CSV")]
        input: String,

        /// JSONL file to write events to
        #[arg(short, long, default_value = "data/events.jsonl")]
        output: String,

        /// Fraction of events to redeliver verbatim
        #[arg(long, default_value_t = 0.05)]
        duplicates: f64,

        /// Fraction of events to corrupt (one required field blanked)
        #[arg(long, default_value_t = 0.05)]
        corrupt: f64,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Ingest a JSONL event stream into the trip record store
    Ingest {
        /// JSONL events file
        #[arg(value_name = "EVENTS_JSONL")]
        input: String,

        /// Trip record store document
        #[arg(short, long, default_value = "data/trips.json")]
        store: String,

        /// CSV file rejected events are appended to
        #[arg(short, long, default_value = "data/errors.csv")]
        errors: String,

        /// Maximum number of events processed concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Run the daily KPI batch for one date
    RunBatch {
        /// Target date (defaults to yesterday, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Re-aggregate even if the date is already marked processed
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Trip record store document
        #[arg(short, long, default_value = "data/trips.json")]
        store: String,

        /// S3 bucket for KPI output and aggregation state (e.g. "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Local directory used instead of S3 when no bucket is given
        #[arg(short, long, default_value = "out")]
        output_dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/trip_kpi.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("trip_kpi.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            input,
            output,
            duplicates,
            corrupt,
            seed,
        } => {
            let config = SimulatorConfig {
                duplicate_fraction: duplicates,
                corrupt_fraction: corrupt,
                seed,
            };
            let events = simulate_events(&input, &config)?;
            write_jsonl(&output, &events)?;
            info!(events = events.len(), output = %output, "Event stream written");
        }
        Commands::Ingest {
            input,
            store,
            errors,
            concurrency,
        } => {
            ingest(&input, &store, &errors, concurrency).await?;
        }
        Commands::RunBatch {
            date,
            force,
            store,
            s3_bucket,
            output_dir,
        } => {
            run_batch(date, force, &store, s3_bucket, &output_dir).await?;
        }
    }

    Ok(())
}

/// Processes every event in a JSONL file with bounded concurrency.
#[tracing::instrument(skip(store_path, errors_path), fields(input))]
async fn ingest(
    input: &str,
    store_path: &str,
    errors_path: &str,
    concurrency: usize,
) -> Result<()> {
    let trips = Arc::new(JsonFileTripStore::open(store_path)?);
    let errors = Arc::new(CsvErrorSink::new(errors_path));
    let processor = Arc::new(EventProcessor::new(trips.clone(), errors.clone()));

    let content = std::fs::read_to_string(input)?;
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));

    let mut tasks = vec![];
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let event = match TripEvent::from_json_line(line) {
            Ok(event) => event,
            Err(e) => {
                // Not even JSON; nothing to route anywhere but the log.
                warn!(line = line_no + 1, error = %e, "Skipping unparseable line");
                continue;
            }
        };

        let sem = semaphore.clone();
        let processor = processor.clone();
        let event_span = tracing::info_span!("process_event", line = line_no + 1);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire().await.unwrap();
                processor.process(&event).await
            }
            .instrument(event_span),
        );
        tasks.push(task);
    }

    let mut merged = 0usize;
    let mut rejected = 0usize;
    let mut failed = 0usize;

    for task in tasks {
        match task.await? {
            Ok(ProcessOutcome::Merged { .. }) => merged += 1,
            Ok(ProcessOutcome::Rejected { .. }) => rejected += 1,
            Err(e) => {
                error!(error = %e, "Event processing failed");
                failed += 1;
            }
        }
    }

    info!(merged, rejected, failed, "Ingest complete");
    Ok(())
}

/// Runs the daily batch against S3 or a local output directory.
#[tracing::instrument(skip(store_path, s3_bucket, output_dir), fields(date = ?date, force))]
async fn run_batch(
    date: Option<NaiveDate>,
    force: bool,
    store_path: &str,
    s3_bucket: Option<String>,
    output_dir: &str,
) -> Result<()> {
    let target = match date {
        Some(date) => date,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .expect("yesterday exists"),
    };

    let trips = JsonFileTripStore::open(store_path)?;

    let output: Box<dyn ObjectStore> = match s3_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, "Writing batch output to S3");
            Box::new(S3ObjectStore::from_env(bucket).await)
        }
        None => {
            info!(output_dir, "Writing batch output locally");
            Box::new(LocalObjectStore::new(output_dir))
        }
    };

    let driver = DailyBatchDriver::new(&trips, output.as_ref());
    match driver.run(target, force).await? {
        BatchOutcome::Skipped => {
            info!(date = %target, "Batch skipped, date already processed");
        }
        BatchOutcome::Completed(kpi) => {
            info!(
                date = %target,
                count_trips = kpi.count_trips,
                total_fare = kpi.total_fare,
                key = kpi_key(target),
                "Batch complete"
            );
        }
    }

    Ok(())
}
