//! Metering error types
//!
//! Extraction failures are per rule and per event; aggregation failures are
//! per bucket. Both are plain values so batch callers can keep going and
//! replay the failed item after a fix.

use std::fmt;

use chrono::{DateTime, Utc};
use meterline_common::{AggregationKind, QuantityError, RecordId, TenantScope, TimeWindow};
use serde::Serialize;
use thiserror::Error;

use crate::aggregation::BucketKey;

/// Why a single extraction rule failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtractionErrorKind {
    MissingProperty,
    InvalidQuantity { value: String },
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionErrorKind::MissingProperty => write!(f, "missing property"),
            ExtractionErrorKind::InvalidQuantity { value } => {
                write!(f, "invalid quantity {value:?}")
            }
        }
    }
}

/// Failure of one extraction rule on one event
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} for rule #{rule_index} ({source_property} -> {unit}) on event {event_id} in {scope}")]
pub struct ExtractionError {
    /// What went wrong
    pub kind: ExtractionErrorKind,
    /// Position of the rule in its configuration
    pub rule_index: usize,
    /// Property the rule reads
    pub source_property: String,
    /// Unit the rule would have produced
    pub unit: String,
    /// Event the rule ran against
    pub event_id: String,
    /// Scope of that event
    pub scope: TenantScope,
}

/// Aggregation precondition and arithmetic failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Heterogeneous input for bucket {bucket}: record {record_id} has {found}")]
    HeterogeneousInput {
        bucket: BucketKey,
        record_id: RecordId,
        found: String,
    },

    #[error("Strategy {kind} requires at least one record (bucket {bucket})")]
    MissingRecords {
        kind: AggregationKind,
        bucket: String,
    },

    #[error("No records and no carried-forward value for bucket {bucket} over {window}")]
    NoData { bucket: BucketKey, window: TimeWindow },

    #[error("Record {record_id} observed at {observed_at} lies outside {window}")]
    RecordOutsideWindow {
        record_id: RecordId,
        observed_at: DateTime<Utc>,
        window: TimeWindow,
    },

    #[error("Aggregation window {window} must be a span")]
    InvalidWindow { window: TimeWindow },

    #[error("Arithmetic failure in bucket {bucket}: {cause}")]
    Arithmetic { bucket: BucketKey, cause: QuantityError },
}
