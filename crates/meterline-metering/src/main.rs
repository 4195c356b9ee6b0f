//! Meterline batch binary
//!
//! Meters a file of events, groups the records into billing windows and
//! writes one reading per bucket to stdout as JSON lines.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use meterline_common::VERSION;
use meterline_metering::{
    input, meter_batch, Aggregator, BucketReducer, MeterlineSettings, RecordBuckets,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = MeterlineSettings::load()?;

    // Initialize tracing; stdout carries readings, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    info!("Starting Meterline v{}", VERSION);
    info!(
        "Window: {:?}, default aggregation: {}, average scale: {}",
        settings.window, settings.aggregation.default, settings.average_scale
    );

    let events_raw = tokio::fs::read_to_string(&settings.input.events_path)
        .await
        .with_context(|| format!("reading events from {}", settings.input.events_path))?;
    let configs_raw = tokio::fs::read_to_string(&settings.input.configs_path)
        .await
        .with_context(|| format!("reading configs from {}", settings.input.configs_path))?;

    let events = input::parse_events(&events_raw)?;
    let store = input::parse_configs(&configs_raw)?;
    info!(events = events.len(), configs = store.len(), "Loaded inputs");

    // One clock reading for the whole run
    let now = Utc::now();

    let batch = meter_batch(&events, &store, now);
    for failure in &batch.failures {
        warn!(%failure, "Extraction failure");
    }
    if !batch.unconfigured.is_empty() {
        info!(count = batch.unconfigured.len(), "Events without metering configuration");
    }

    let buckets = RecordBuckets::new(settings.window);
    let added = buckets.extend(batch.records)?;
    info!(records = added, buckets = buckets.len(), "Grouped records");

    let reducer = BucketReducer::new(
        Aggregator::new(settings.average_scale),
        settings.aggregation.clone(),
        settings.window,
    );
    let report = reducer.reduce(&buckets.snapshot(), &BTreeMap::new(), now);
    for failure in &report.failures {
        warn!(
            bucket = %failure.bucket.key,
            window = %failure.bucket.window,
            error = %failure.error,
            "Aggregation failure"
        );
    }

    let rendered = input::render_readings(&report.readings)?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(rendered.as_bytes()).await?;
    stdout.flush().await?;

    info!(
        readings = report.readings.len(),
        extraction_failures = batch.failures.len(),
        aggregation_failures = report.failures.len(),
        "Meterline run complete"
    );
    Ok(())
}
