//! Batch reduction of grouped buckets
//!
//! Chooses a strategy per unit, reduces every bucket, and for
//! time-weighted averages carries each key's terminal value into the next
//! window, emitting zero-record readings for windows with no new data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meterline_common::{AggregationKind, MeterReading, WindowSize};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::engine::{Aggregator, BucketInput, BucketKey, CarryForward};
use super::grouping::{Bucket, BucketId};
use crate::error::AggregationError;

/// Strategy per unit, with a fallback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPolicy {
    /// Strategy for units without an override
    pub default: AggregationKind,
    /// Unit-specific strategies
    pub per_unit: BTreeMap<String, AggregationKind>,
}

impl AggregationPolicy {
    pub fn new(default: AggregationKind) -> Self {
        Self {
            default,
            per_unit: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>, kind: AggregationKind) -> Self {
        self.per_unit.insert(unit.into(), kind);
        self
    }

    pub fn kind_for(&self, unit: &str) -> AggregationKind {
        self.per_unit.get(unit).copied().unwrap_or(self.default)
    }
}

/// A bucket that could not be reduced
#[derive(Debug, Clone, PartialEq)]
pub struct BucketFailure {
    pub bucket: BucketId,
    pub error: AggregationError,
}

/// Readings and failures from one reduction pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReductionReport {
    pub readings: Vec<MeterReading>,
    pub failures: Vec<BucketFailure>,
}

/// Reduces buckets produced by [`RecordBuckets`](super::grouping::RecordBuckets)
#[derive(Debug, Clone)]
pub struct BucketReducer {
    aggregator: Aggregator,
    policy: AggregationPolicy,
    window_size: WindowSize,
}

impl BucketReducer {
    pub fn new(aggregator: Aggregator, policy: AggregationPolicy, window_size: WindowSize) -> Self {
        Self {
            aggregator,
            policy,
            window_size,
        }
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Reduce every bucket.
    ///
    /// `carried` seeds time-weighted averages with the terminal value of the
    /// window before each key's first bucket. A failing bucket is recorded and
    /// the pass continues.
    #[instrument(skip_all, fields(buckets = buckets.len()))]
    pub fn reduce(
        &self,
        buckets: &[Bucket],
        carried: &BTreeMap<BucketKey, (DateTime<Utc>, CarryForward)>,
        created_at: DateTime<Utc>,
    ) -> ReductionReport {
        let mut ordered: Vec<&Bucket> = buckets.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut report = ReductionReport::default();
        // Per key: end of the last reduced window and its terminal value
        let mut last: BTreeMap<&BucketKey, (DateTime<Utc>, CarryForward)> = BTreeMap::new();

        for bucket in ordered {
            let key = &bucket.id.key;
            let kind = self.policy.kind_for(&key.unit);

            let carry = if kind == AggregationKind::TimeWeightedAvg {
                let previous = last.get(key).copied().or_else(|| carried.get(key).copied());
                match previous {
                    Some((until, value)) => {
                        self.fill_gap(key, until, bucket.id.window.start, value, created_at, &mut report);
                        Some(value)
                    }
                    None => None,
                }
            } else {
                None
            };

            let input = BucketInput::new(key, bucket.id.window, &bucket.records).with_carry_forward(carry);
            match self.aggregator.aggregate(&input, kind, created_at) {
                Ok(reading) => report.readings.push(reading),
                Err(error) => {
                    warn!(bucket = %key, window = %bucket.id.window, %error, "Bucket aggregation failed");
                    report.failures.push(BucketFailure {
                        bucket: bucket.id.clone(),
                        error,
                    });
                }
            }

            if kind == AggregationKind::TimeWeightedAvg {
                if let Some(terminal) = CarryForward::from_records(&bucket.records).or(carry) {
                    last.insert(key, (bucket.id.window.end, terminal));
                }
            }
        }

        info!(
            readings = report.readings.len(),
            failures = report.failures.len(),
            "Reduced buckets"
        );
        report
    }

    /// Zero-record readings for every window in `[from, to)`
    fn fill_gap(
        &self,
        key: &BucketKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        carry: CarryForward,
        created_at: DateTime<Utc>,
        report: &mut ReductionReport,
    ) {
        let windows = match self.window_size.windows_between(from, to) {
            Ok(windows) => windows,
            Err(error) => {
                warn!(bucket = %key, %error, "Cannot enumerate gap windows");
                return;
            }
        };

        for window in windows {
            let input = BucketInput::new(key, window, &[]).with_carry_forward(Some(carry));
            match self
                .aggregator
                .aggregate(&input, AggregationKind::TimeWeightedAvg, created_at)
            {
                Ok(reading) => report.readings.push(reading),
                Err(error) => report.failures.push(BucketFailure {
                    bucket: BucketId {
                        key: key.clone(),
                        window,
                    },
                    error,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::grouping::RecordBuckets;
    use chrono::TimeZone;
    use meterline_common::{
        Observation, Properties, Quantity, RecordId, Subject, TenantScope,
    };
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn record(event: &str, unit: &str, quantity: &str, observed_at: DateTime<Utc>) -> meterline_common::MeteredRecord {
        let scope = TenantScope::new("ws_1", "production");
        meterline_common::MeteredRecord {
            id: RecordId::derive(&scope, event, unit, 0),
            scope,
            subject: Subject::from("customer:cust_123"),
            observed_at,
            observation: Observation::new_instant(Quantity::parse(quantity).unwrap(), unit, observed_at),
            dimensions: Properties::new(),
            source_event_id: event.to_string(),
            metered_at: observed_at,
        }
    }

    fn reducer(policy: AggregationPolicy) -> BucketReducer {
        BucketReducer::new(Aggregator::default(), policy, WindowSize::Hour)
    }

    #[test]
    fn test_policy_lookup() {
        let policy = AggregationPolicy::new(AggregationKind::Sum)
            .with_unit("gauge", AggregationKind::TimeWeightedAvg);
        assert_eq!(policy.kind_for("gauge"), AggregationKind::TimeWeightedAvg);
        assert_eq!(policy.kind_for("bytes"), AggregationKind::Sum);
    }

    #[test]
    fn test_reduce_uses_unit_strategy() {
        let buckets = RecordBuckets::new(WindowSize::Hour);
        buckets
            .extend([
                record("e1", "bytes", "10", at(10, 0)),
                record("e2", "bytes", "5", at(10, 30)),
                record("e3", "peak", "10", at(10, 0)),
                record("e4", "peak", "5", at(10, 30)),
            ])
            .unwrap();

        let policy = AggregationPolicy::new(AggregationKind::Sum).with_unit("peak", AggregationKind::Max);
        let report = reducer(policy).reduce(&buckets.snapshot(), &BTreeMap::new(), at(12, 0));

        assert!(report.failures.is_empty());
        let by_unit: BTreeMap<_, _> = report
            .readings
            .iter()
            .map(|r| (r.value.unit.as_str(), r))
            .collect();
        assert_eq!(by_unit["bytes"].value.quantity, dec!(15));
        assert_eq!(by_unit["peak"].value.quantity, dec!(10));
        assert_eq!(by_unit["peak"].aggregation, AggregationKind::Max);
    }

    #[test]
    fn test_time_weighted_carries_across_gaps() {
        let buckets = RecordBuckets::new(WindowSize::Hour);
        buckets
            .extend([
                record("e1", "gauge", "4", at(10, 30)),
                record("e2", "gauge", "8", at(13, 0)),
            ])
            .unwrap();

        let policy = AggregationPolicy::new(AggregationKind::TimeWeightedAvg);
        let report = reducer(policy).reduce(&buckets.snapshot(), &BTreeMap::new(), at(14, 0));
        assert!(report.failures.is_empty());

        let mut readings = report.readings.clone();
        readings.sort_by_key(|r| r.window.start);
        let summary: Vec<_> = readings
            .iter()
            .map(|r| (r.window.start, r.value.quantity, r.record_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                (at(10, 0), Quantity::new(dec!(4)), 1),
                (at(11, 0), Quantity::new(dec!(4)), 0),
                (at(12, 0), Quantity::new(dec!(4)), 0),
                (at(13, 0), Quantity::new(dec!(8)), 1),
            ]
        );
    }

    #[test]
    fn test_seeded_carry_fills_leading_gap() {
        let buckets = RecordBuckets::new(WindowSize::Hour);
        buckets
            .extend([record("e1", "gauge", "10", at(10, 30))])
            .unwrap();
        let key = buckets.snapshot()[0].id.key.clone();

        let seed = CarryForward {
            quantity: Quantity::new(dec!(2)),
            max_metered_at: at(9, 59),
        };
        let carried = BTreeMap::from([(key, (at(10, 0), seed))]);

        let policy = AggregationPolicy::new(AggregationKind::TimeWeightedAvg);
        let report = reducer(policy).reduce(&buckets.snapshot(), &carried, at(11, 0));
        assert_eq!(report.readings.len(), 1);
        // 2 for 30 minutes, 10 for 30 minutes
        assert_eq!(report.readings[0].value.quantity, dec!(6));
    }

    #[test]
    fn test_failures_do_not_stop_the_pass() {
        let good = record("e1", "bytes", "1", at(10, 0));
        let stray = record("e2", "bytes", "1", at(12, 0));
        let window = WindowSize::Hour.bucket_for(at(10, 0)).unwrap();
        let key = BucketKey::of(&good);

        let buckets = vec![
            Bucket {
                id: BucketId {
                    key: key.clone(),
                    window,
                },
                records: vec![stray],
            },
            Bucket {
                id: BucketId {
                    key,
                    window: WindowSize::Hour.bucket_for(at(11, 0)).unwrap(),
                },
                records: vec![record("e3", "bytes", "2", at(11, 15))],
            },
        ];

        let report = reducer(AggregationPolicy::default()).reduce(&buckets, &BTreeMap::new(), at(13, 0));
        assert_eq!(report.readings.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            AggregationError::RecordOutsideWindow { .. }
        ));
    }
}
