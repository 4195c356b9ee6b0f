//! Metered records and meter readings
//!
//! Records are produced by extraction, one per fired rule; readings are
//! produced by aggregation, one per bucket. Neither is edited after emission:
//! corrections are new records or readings with the same deterministic id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Properties;
use super::ids::{ReadingId, RecordId};
use super::observation::{Aggregate, Observation};
use super::scope::{Subject, TenantScope};
use super::window::TimeWindow;
use crate::error::ConfigError;

/// One extraction result from one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteredRecord {
    pub id: RecordId,
    pub scope: TenantScope,
    pub subject: Subject,
    /// Business time of the measurement
    pub observed_at: DateTime<Utc>,
    pub observation: Observation,
    /// Event properties not consumed as a quantity source
    pub dimensions: Properties,
    pub source_event_id: String,
    /// Processing time, used as the watermark
    pub metered_at: DateTime<Utc>,
}

impl MeteredRecord {
    #[inline]
    pub fn unit(&self) -> &str {
        &self.observation.unit
    }
}

/// Reduction applied to a bucket of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationKind {
    Sum,
    Max,
    Min,
    Latest,
    TimeWeightedAvg,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 5] = [
        AggregationKind::Sum,
        AggregationKind::Max,
        AggregationKind::Min,
        AggregationKind::Latest,
        AggregationKind::TimeWeightedAvg,
    ];

    /// Stable tag used in serialized output and id derivation
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Max => "max",
            AggregationKind::Min => "min",
            AggregationKind::Latest => "latest",
            AggregationKind::TimeWeightedAvg => "time-weighted-avg",
        }
    }
}

impl Default for AggregationKind {
    fn default() -> Self {
        AggregationKind::Sum
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown aggregation kind: {s}")))
    }
}

/// One aggregation result over a billing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: ReadingId,
    pub scope: TenantScope,
    pub subject: Subject,
    /// Billing bucket, half-open
    pub window: TimeWindow,
    pub value: Aggregate,
    pub aggregation: AggregationKind,
    /// Records that contributed; zero only for a carried-forward average
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
    pub max_metered_at: DateTime<Utc>,
}

impl MeterReading {
    /// True when the two readings agree on everything except `created_at`
    pub fn same_result(&self, other: &MeterReading) -> bool {
        self.id == other.id
            && self.scope == other.scope
            && self.subject == other.subject
            && self.window == other.window
            && self.value.unit == other.value.unit
            && self.value.quantity.to_string() == other.value.quantity.to_string()
            && self.aggregation == other.aggregation
            && self.record_count == other.record_count
            && self.max_metered_at == other.max_metered_at
    }
}
