//! End-to-end tests for Meterline
//!
//! Events flow through extraction, grouping and aggregation exactly as the
//! batch binary runs them.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use meterline_common::{
    AggregationKind, EventPayload, Quantity, Subject, TenantScope, TimeWindow, WindowSize,
};
use meterline_metering::{
    meter, meter_batch, AggregationPolicy, Aggregator, BucketInput, BucketKey, BucketReducer,
    ExtractionRule, InMemoryConfigStore, MeteringConfig, PropertyFilter, RecordBuckets,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn scope() -> TenantScope {
    TenantScope::new("ws_1", "production")
}

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
}

fn processing_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap()
}

fn api_config() -> MeteringConfig {
    MeteringConfig::new(vec![ExtractionRule::new("response_time_ms", "milliseconds")])
}

fn api_event(n: u32, response_ms: &str) -> EventPayload {
    EventPayload::new(
        format!("evt_{n}"),
        scope(),
        "api_request",
        "customer:cust_123",
        day_start() + Duration::minutes(i64::from(n) * 10),
    )
    .with_properties([
        ("endpoint", "/x".to_string()),
        ("response_time_ms", response_ms.to_string()),
    ])
}

/// 100 events whose response times sum to 14523
fn hundred_events() -> Vec<EventPayload> {
    (0..100)
        .map(|n| {
            let ms = if n == 0 { 14523 - 99 * 145 } else { 145 };
            api_event(n, &ms.to_string())
        })
        .collect()
}

#[test]
fn test_hundred_records_sum_for_one_day() {
    let mut store = InMemoryConfigStore::new();
    store.insert("ws_1", "api_request", api_config()).unwrap();

    let batch = meter_batch(&hundred_events(), &store, processing_time());
    assert_eq!(batch.records.len(), 100);
    assert!(batch.failures.is_empty());

    let window = TimeWindow::span(day_start(), day_start() + Duration::days(1)).unwrap();
    let key = BucketKey::new(scope(), Subject::from("customer:cust_123"), "milliseconds");
    let reading = Aggregator::default()
        .aggregate(
            &BucketInput::new(&key, window, &batch.records),
            AggregationKind::Sum,
            processing_time(),
        )
        .unwrap();

    assert_eq!(reading.value.quantity.to_string(), "14523");
    assert_eq!(reading.value.unit, "milliseconds");
    assert_eq!(reading.record_count, 100);
    assert_eq!(reading.window, window);
    assert_eq!(reading.max_metered_at, processing_time());
}

#[test]
fn test_pipeline_through_daily_buckets() {
    let mut store = InMemoryConfigStore::new();
    store.insert("ws_1", "api_request", api_config()).unwrap();

    let mut events = hundred_events();
    // Exactly at the next day's start: belongs to the next bucket
    let mut boundary = api_event(999, "7");
    boundary.event_time = day_start() + Duration::days(1);
    events.push(boundary);

    let batch = meter_batch(&events, &store, processing_time());
    let buckets = RecordBuckets::new(WindowSize::Day);
    buckets.extend(batch.records.clone()).unwrap();
    // Redelivery of the whole batch changes nothing
    assert_eq!(buckets.extend(batch.records).unwrap(), 0);

    let reducer = BucketReducer::new(
        Aggregator::default(),
        AggregationPolicy::new(AggregationKind::Sum),
        WindowSize::Day,
    );
    let report = reducer.reduce(&buckets.snapshot(), &BTreeMap::new(), processing_time());
    assert!(report.failures.is_empty());
    assert_eq!(report.readings.len(), 2);

    let first = &report.readings[0];
    assert_eq!(first.window.start, day_start());
    assert_eq!(first.value.quantity, dec!(14523));
    assert_eq!(first.record_count, 100);

    let second = &report.readings[1];
    assert_eq!(second.window.start, day_start() + Duration::days(1));
    assert_eq!(second.value.quantity, dec!(7));
}

#[test]
fn test_universes_never_mix() {
    let mut store = InMemoryConfigStore::new();
    store.insert("ws_1", "api_request", api_config()).unwrap();

    let prod = api_event(1, "100");
    let mut sandbox = api_event(1, "5");
    sandbox.scope = TenantScope::new("ws_1", "test");

    let batch = meter_batch(&[prod, sandbox], &store, processing_time());
    assert_ne!(batch.records[0].id, batch.records[1].id);

    let buckets = RecordBuckets::new(WindowSize::Day);
    buckets.extend(batch.records).unwrap();
    let snapshot = buckets.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|b| b.records.len() == 1));
}

#[test]
fn test_filter_gated_rules_in_a_mixed_config() {
    let config = MeteringConfig::new(vec![
        ExtractionRule::new("response_time_ms", "premium_milliseconds")
            .with_filter(PropertyFilter::equals("tier", "premium")),
        ExtractionRule::new("response_time_ms", "milliseconds"),
    ]);

    let output = meter(&api_event(1, "145"), &config, processing_time());
    assert_eq!(output.records.len(), 1);
    assert_eq!(output.records[0].unit(), "milliseconds");

    let premium = api_event(1, "145").with_property("tier", "premium");
    let output = meter(&premium, &config, processing_time());
    let units: Vec<_> = output.records.iter().map(|r| r.unit().to_string()).collect();
    assert_eq!(units, vec!["premium_milliseconds", "milliseconds"]);
}

#[test]
fn test_reading_serializes_as_primitives() {
    let output = meter(&api_event(1, "145.50"), &api_config(), processing_time());
    let window = TimeWindow::span(day_start(), day_start() + Duration::days(1)).unwrap();
    let reading = Aggregator::default()
        .aggregate_records(&output.records, window, AggregationKind::Sum, processing_time())
        .unwrap();

    let json = serde_json::to_value(&reading).unwrap();
    assert_eq!(json["value"]["quantity"], "145.50");
    assert_eq!(json["aggregation"], "sum");
    assert_eq!(json["window"]["start"], "2024-01-15T00:00:00Z");
    assert_eq!(json["record_count"], 1);

    let record_json = serde_json::to_value(&output.records[0]).unwrap();
    assert_eq!(record_json["observation"]["quantity"], "145.50");
    assert_eq!(record_json["dimensions"]["endpoint"], "/x");
}

#[test]
fn test_twenty_digit_quantities_sum_exactly() {
    let events = [
        api_event(1, "12345678901234567890.12"),
        api_event(2, "98765432109876543210.99"),
        api_event(3, "0.01"),
    ];
    let records: Vec<_> = events
        .iter()
        .flat_map(|e| meter(e, &api_config(), processing_time()).records)
        .collect();

    let window = TimeWindow::span(day_start(), day_start() + Duration::days(1)).unwrap();
    let reading = Aggregator::default()
        .aggregate_records(&records, window, AggregationKind::Sum, processing_time())
        .unwrap();
    assert_eq!(reading.value.quantity.to_string(), "111111111011111111101.12");
}

#[test]
fn test_time_weighted_avg_of_large_gauge_across_days() {
    let mut first = api_event(1, "12345678901234567890.5");
    first.event_time = day_start();
    let mut second = api_event(2, "12345678901234567891.5");
    second.event_time = day_start() + Duration::days(3) + Duration::hours(12);
    let records: Vec<_> = [first, second]
        .iter()
        .flat_map(|e| meter(e, &api_config(), processing_time()).records)
        .collect();

    let buckets = RecordBuckets::new(WindowSize::Day);
    buckets.extend(records).unwrap();
    let reducer = BucketReducer::new(
        Aggregator::default(),
        AggregationPolicy::new(AggregationKind::TimeWeightedAvg),
        WindowSize::Day,
    );
    let report = reducer.reduce(&buckets.snapshot(), &BTreeMap::new(), processing_time());
    assert!(report.failures.is_empty());

    let summary: Vec<(String, u64)> = report
        .readings
        .iter()
        .map(|r| (r.value.quantity.to_string(), r.record_count))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("12345678901234567890.5".to_string(), 1),
            ("12345678901234567890.5".to_string(), 0),
            ("12345678901234567890.5".to_string(), 0),
            ("12345678901234567891".to_string(), 1),
        ]
    );
}

proptest! {
    #[test]
    fn prop_extraction_is_idempotent(
        values in proptest::collection::vec("[0-9]{1,6}(\\.[0-9]{1,4})?", 1..20),
    ) {
        let config = api_config();
        for (n, value) in values.iter().enumerate() {
            let event = api_event(n as u32, value);
            let first = meter(&event, &config, processing_time());
            let second = meter(&event, &config, processing_time() + Duration::hours(3));
            let ids = |o: &meterline_metering::MeterOutput| o.records.iter().map(|r| r.id).collect::<Vec<_>>();
            prop_assert_eq!(ids(&first), ids(&second));
            prop_assert_eq!(&first.records[0].observation, &second.records[0].observation);
        }
    }

    #[test]
    fn prop_sum_matches_exact_decimal_total(
        cents in proptest::collection::vec(0i64..10_000_000_000, 1..100),
    ) {
        let events: Vec<_> = cents
            .iter()
            .enumerate()
            .map(|(n, c)| api_event(n as u32 % 144, &Decimal::new(*c, 2).to_string()))
            .enumerate()
            .map(|(i, mut e)| { e.id = format!("evt_{i}"); e })
            .collect();
        let config = api_config();
        let records: Vec<_> = events
            .iter()
            .flat_map(|e| meter(e, &config, processing_time()).records)
            .collect();

        let window = TimeWindow::span(day_start(), day_start() + Duration::days(1)).unwrap();
        let reading = Aggregator::default()
            .aggregate_records(&records, window, AggregationKind::Sum, processing_time())
            .unwrap();
        let expected: i64 = cents.iter().sum();
        prop_assert_eq!(reading.value.quantity, Quantity::new(Decimal::new(expected, 2)));
    }

    #[test]
    fn prop_aggregation_is_idempotent(
        values in proptest::collection::vec(-1_000_000i64..1_000_000, 1..50),
        kind_index in 0usize..5,
    ) {
        let kind = AggregationKind::ALL[kind_index];
        let config = api_config();
        let records: Vec<_> = values
            .iter()
            .enumerate()
            .flat_map(|(n, v)| meter(&api_event(n as u32, &Decimal::new(*v, 3).to_string()), &config, processing_time()).records)
            .collect();

        let window = TimeWindow::span(day_start(), day_start() + Duration::days(1)).unwrap();
        let aggregator = Aggregator::default();
        let first = aggregator
            .aggregate_records(&records, window, kind, processing_time())
            .unwrap();
        let mut shuffled = records.clone();
        shuffled.reverse();
        let second = aggregator
            .aggregate_records(&shuffled, window, kind, processing_time() + Duration::minutes(1))
            .unwrap();
        prop_assert!(first.same_result(&second));
    }
}
