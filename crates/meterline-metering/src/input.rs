//! Batch input and output encoding
//!
//! Events arrive as a JSON array or as JSON lines; metering configurations
//! as a JSON array of [`ConfigDocument`]s. Readings leave as JSON lines.

use meterline_common::{EventPayload, MeterReading, Result};

use crate::extraction::{ConfigDocument, InMemoryConfigStore};

/// Parse events from a JSON array or newline-delimited JSON
pub fn parse_events(input: &str) -> Result<Vec<EventPayload>> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Parse and validate metering configuration documents
pub fn parse_configs(input: &str) -> Result<InMemoryConfigStore> {
    let documents: Vec<ConfigDocument> = serde_json::from_str(input)?;
    Ok(InMemoryConfigStore::from_documents(documents)?)
}

/// Encode readings as JSON lines
pub fn render_readings(readings: &[MeterReading]) -> Result<String> {
    let mut out = String::new();
    for reading in readings {
        out.push_str(&serde_json::to_string(reading)?);
        out.push('\n');
    }
    Ok(out)
}
