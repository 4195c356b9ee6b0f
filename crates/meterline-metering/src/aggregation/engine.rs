//! Aggregation engine
//!
//! Reduces one homogeneous bucket of metered records (same scope, subject and
//! unit, all observed inside a half-open billing window) to a
//! [`MeterReading`]. Grouping is the caller's job; see
//! [`RecordBuckets`](super::grouping::RecordBuckets).
//!
//! All arithmetic is exact decimal. The only rounding happens in the final
//! division of the time-weighted average (half-to-even). Its weights are
//! step durations in nanoseconds divided by their greatest common divisor.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use meterline_common::{
    Aggregate, AggregationKind, MeterReading, MeteredRecord, Quantity, QuantityError, ReadingId,
    Subject, TenantScope, TimeWindow, DEFAULT_AVERAGE_SCALE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::AggregationError;

/// Identity shared by every record in a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Workspace and universe
    pub scope: TenantScope,
    /// Billed entity
    pub subject: Subject,
    /// Unit of every record in the bucket
    pub unit: String,
}

impl BucketKey {
    pub fn new(scope: TenantScope, subject: Subject, unit: impl Into<String>) -> Self {
        Self {
            scope,
            subject,
            unit: unit.into(),
        }
    }

    pub fn of(record: &MeteredRecord) -> Self {
        Self {
            scope: record.scope.clone(),
            subject: record.subject.clone(),
            unit: record.observation.unit.clone(),
        }
    }

    /// Mismatch description, or `None` when the record belongs here
    fn mismatch(&self, record: &MeteredRecord) -> Option<String> {
        if record.scope != self.scope {
            Some(format!("scope {}", record.scope))
        } else if record.subject != self.subject {
            Some(format!("subject {}", record.subject))
        } else if record.observation.unit != self.unit {
            Some(format!("unit {}", record.observation.unit))
        } else {
            None
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope, self.subject, self.unit)
    }
}

/// Terminal value of the previous window, for time-weighted averages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarryForward {
    /// Last value seen in the previous window
    pub quantity: Quantity,
    /// Watermark of the previous window
    pub max_metered_at: DateTime<Utc>,
}

impl CarryForward {
    /// Value of the latest record, with the bucket's watermark
    pub fn from_records(records: &[MeteredRecord]) -> Option<Self> {
        let last = records.iter().max_by(|a, b| latest_order(a, b))?;
        let max_metered_at = records.iter().map(|r| r.metered_at).max()?;
        Some(Self {
            quantity: last.observation.quantity,
            max_metered_at,
        })
    }
}

/// `(observed_at, metered_at, id)` total order used by `latest`
fn latest_order(a: &MeteredRecord, b: &MeteredRecord) -> Ordering {
    a.observed_at
        .cmp(&b.observed_at)
        .then(a.metered_at.cmp(&b.metered_at))
        .then(a.id.cmp(&b.id))
}

/// One bucket ready for reduction
#[derive(Debug, Clone, Copy)]
pub struct BucketInput<'a> {
    /// Identity every record must match
    pub key: &'a BucketKey,
    /// Half-open billing window
    pub window: TimeWindow,
    /// Records observed inside `window`
    pub records: &'a [MeteredRecord],
    /// Terminal value of the previous window, for time-weighted averages
    pub carry_forward: Option<CarryForward>,
}

impl<'a> BucketInput<'a> {
    pub fn new(key: &'a BucketKey, window: TimeWindow, records: &'a [MeteredRecord]) -> Self {
        Self {
            key,
            window,
            records,
            carry_forward: None,
        }
    }

    pub fn with_carry_forward(mut self, carry: Option<CarryForward>) -> Self {
        self.carry_forward = carry;
        self
    }
}

/// Pure reducer from a bucket to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    /// Decimal places kept by time-weighted averages
    average_scale: u32,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_AVERAGE_SCALE)
    }
}

impl Aggregator {
    pub fn new(average_scale: u32) -> Self {
        Self {
            average_scale: average_scale.min(meterline_common::types::quantity::MAX_SCALE),
        }
    }

    pub fn average_scale(&self) -> u32 {
        self.average_scale
    }

    /// Reduce an ungrouped-looking record set whose key is taken from its
    /// first record. Empty input has no key and is always `MissingRecords`.
    pub fn aggregate_records(
        &self,
        records: &[MeteredRecord],
        window: TimeWindow,
        kind: AggregationKind,
        created_at: DateTime<Utc>,
    ) -> Result<MeterReading, AggregationError> {
        let first = records.first().ok_or_else(|| AggregationError::MissingRecords {
            kind,
            bucket: format!("<unkeyed> {window}"),
        })?;
        let key = BucketKey::of(first);
        self.aggregate(&BucketInput::new(&key, window, records), kind, created_at)
    }

    /// Reduce one bucket with `kind`.
    ///
    /// Fails when the window is not a span, when a record does not match the
    /// bucket key or lies outside `[window.start, window.end)`, when
    /// sum/max/min/latest see no records, and when a time-weighted average
    /// has neither records nor a carried-forward value.
    #[instrument(skip(self, input), fields(bucket = %input.key, window = %input.window, records = input.records.len()))]
    pub fn aggregate(
        &self,
        input: &BucketInput<'_>,
        kind: AggregationKind,
        created_at: DateTime<Utc>,
    ) -> Result<MeterReading, AggregationError> {
        validate(input)?;

        let records = input.records;
        let (quantity, max_metered_at) = match kind {
            AggregationKind::TimeWeightedAvg if records.is_empty() => {
                let carry = input.carry_forward.ok_or_else(|| AggregationError::NoData {
                    bucket: input.key.clone(),
                    window: input.window,
                })?;
                (carry.quantity, carry.max_metered_at)
            }
            _ if records.is_empty() => {
                return Err(AggregationError::MissingRecords {
                    kind,
                    bucket: input.key.to_string(),
                });
            }
            AggregationKind::TimeWeightedAvg => {
                (self.time_weighted_avg(input)?, max_metered_at(records))
            }
            AggregationKind::Sum => {
                let total = Quantity::sum(records.iter().map(|r| r.observation.quantity))
                    .map_err(|cause| arithmetic(input.key, cause))?;
                (total, max_metered_at(records))
            }
            AggregationKind::Max => (pick(records, Ordering::Greater), max_metered_at(records)),
            AggregationKind::Min => (pick(records, Ordering::Less), max_metered_at(records)),
            AggregationKind::Latest => {
                let latest = records
                    .iter()
                    .max_by(|a, b| latest_order(a, b))
                    .map(|r| r.observation.quantity)
                    .unwrap_or_default();
                (latest, max_metered_at(records))
            }
        };

        let key = input.key;
        let reading = MeterReading {
            id: ReadingId::derive(&key.scope, &key.subject, &key.unit, &input.window, kind),
            scope: key.scope.clone(),
            subject: key.subject.clone(),
            window: input.window,
            value: Aggregate::new(quantity, key.unit.clone()),
            aggregation: kind,
            record_count: records.len() as u64,
            created_at,
            max_metered_at,
        };

        debug!(reading_id = %reading.id, quantity = %reading.value.quantity, "Aggregated bucket");
        Ok(reading)
    }

    /// Step-function average: each value holds from its observation until the
    /// next one (or the window end). A carried-forward value covers the gap
    /// between the window start and the first record.
    fn time_weighted_avg(&self, input: &BucketInput<'_>) -> Result<Quantity, AggregationError> {
        let mut sorted: Vec<&MeteredRecord> = input.records.iter().collect();
        sorted.sort_by(|a, b| latest_order(a, b));

        let mut points: Vec<(DateTime<Utc>, Quantity)> = Vec::with_capacity(sorted.len() + 1);
        if let (Some(carry), Some(first)) = (input.carry_forward, sorted.first()) {
            if first.observed_at > input.window.start {
                points.push((input.window.start, carry.quantity));
            }
        }
        points.extend(sorted.iter().map(|r| (r.observed_at, r.observation.quantity)));

        let fail = |cause| arithmetic(input.key, cause);
        let mut steps: Vec<(Quantity, u64)> = Vec::with_capacity(points.len());
        for (i, (from, value)) in points.iter().enumerate() {
            let until = points.get(i + 1).map_or(input.window.end, |(next, _)| *next);
            let nanos = (until - *from)
                .num_nanoseconds()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or(QuantityError::Overflow)
                .map_err(fail)?;
            if nanos > 0 {
                steps.push((*value, nanos));
            }
        }

        // Weights in the coarsest unit that divides every step
        let unit = steps.iter().fold(0, |acc, (_, nanos)| gcd(acc, *nanos));
        if unit > 1 {
            for (_, nanos) in &mut steps {
                *nanos /= unit;
            }
        }

        Quantity::weighted_average(&steps, self.average_scale)
            .map(|average| average.normalized())
            .map_err(fail)
    }
}

fn validate(input: &BucketInput<'_>) -> Result<(), AggregationError> {
    if !input.window.is_span() {
        return Err(AggregationError::InvalidWindow {
            window: input.window,
        });
    }

    for record in input.records {
        if let Some(found) = input.key.mismatch(record) {
            return Err(AggregationError::HeterogeneousInput {
                bucket: input.key.clone(),
                record_id: record.id,
                found,
            });
        }
        if !input.window.contains(record.observed_at) {
            return Err(AggregationError::RecordOutsideWindow {
                record_id: record.id,
                observed_at: record.observed_at,
                window: input.window,
            });
        }
    }
    Ok(())
}

/// Extreme quantity in direction `want`; ties go to the smallest record id
fn pick(records: &[MeteredRecord], want: Ordering) -> Quantity {
    records
        .iter()
        .reduce(|best, r| {
            match r.observation.quantity.cmp(&best.observation.quantity) {
                ord if ord == want => r,
                Ordering::Equal if r.id < best.id => r,
                _ => best,
            }
        })
        .map(|r| r.observation.quantity)
        .unwrap_or_default()
}

fn max_metered_at(records: &[MeteredRecord]) -> DateTime<Utc> {
    records
        .iter()
        .map(|r| r.metered_at)
        .max()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn arithmetic(key: &BucketKey, cause: QuantityError) -> AggregationError {
    AggregationError::Arithmetic {
        bucket: key.clone(),
        cause,
    }
}
