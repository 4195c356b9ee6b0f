//! Extraction engine
//!
//! Applies a [`MeteringConfig`] to an [`EventPayload`] and produces zero or
//! more [`MeteredRecord`]s. The engine is pure: processing time is supplied
//! by the caller and the same `(payload, config)` always yields the same
//! record ids and observations.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use meterline_common::{EventPayload, MeteredRecord, Observation, Properties, Quantity, RecordId};
use tracing::{debug, instrument, warn};

use super::resolver::ConfigResolver;
use super::rule::{ExtractionRule, MeteringConfig};
use crate::error::{ExtractionError, ExtractionErrorKind};

/// Records and per-rule failures for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterOutput {
    pub records: Vec<MeteredRecord>,
    pub failures: Vec<ExtractionError>,
}

impl MeterOutput {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Meter one event.
///
/// Never fails as a whole: a rule whose source property is missing or does
/// not parse as a decimal is reported in `failures` and the remaining rules
/// still run. Producing no records is a valid outcome.
pub fn meter(
    payload: &EventPayload,
    config: &MeteringConfig,
    metered_at: DateTime<Utc>,
) -> MeterOutput {
    let mut unit_positions: HashMap<&str, u32> = HashMap::new();
    let mut output = MeterOutput::default();
    // Rules that produced a value, with their unit occurrence
    let mut fired: Vec<(&ExtractionRule, u32, Quantity)> = Vec::new();

    for (index, rule) in config.extractions.iter().enumerate() {
        // Position among rules sharing this unit, so repeated units get distinct ids
        let occurrence = {
            let seen = unit_positions.entry(rule.unit.as_str()).or_insert(0);
            let current = *seen;
            *seen += 1;
            current
        };

        if !rule.applies_to(&payload.properties) {
            continue;
        }

        let failure = |kind| ExtractionError {
            kind,
            rule_index: index,
            source_property: rule.source_property.clone(),
            unit: rule.unit.clone(),
            event_id: payload.id.clone(),
            scope: payload.scope.clone(),
        };

        let raw = match payload.property(&rule.source_property) {
            Some(raw) => raw,
            None => {
                output
                    .failures
                    .push(failure(ExtractionErrorKind::MissingProperty));
                continue;
            }
        };

        match Quantity::parse(raw) {
            Ok(quantity) => fired.push((rule, occurrence, quantity)),
            Err(_) => output.failures.push(failure(ExtractionErrorKind::InvalidQuantity {
                value: raw.to_string(),
            })),
        }
    }

    let dimensions = dimensions_for(payload, fired.iter().map(|(rule, _, _)| *rule));
    output.records = fired
        .into_iter()
        .map(|(rule, occurrence, quantity)| MeteredRecord {
            id: RecordId::derive(&payload.scope, &payload.id, &rule.unit, occurrence),
            scope: payload.scope.clone(),
            subject: payload.subject.clone(),
            observed_at: payload.event_time,
            observation: Observation::new_instant(quantity, rule.unit.clone(), payload.event_time),
            dimensions: dimensions.clone(),
            source_event_id: payload.id.clone(),
            metered_at,
        })
        .collect();

    for failure in &output.failures {
        warn!(
            event_id = %failure.event_id,
            rule = failure.rule_index,
            property = %failure.source_property,
            error = %failure.kind,
            "Extraction rule failed"
        );
    }
    debug!(
        event_id = %payload.id,
        records = output.records.len(),
        failures = output.failures.len(),
        "Metered event"
    );

    output
}

/// Properties minus every source property consumed by a rule that produced a
/// record. Filter keys, and the sources of failed rules, stay.
fn dimensions_for<'a, I>(payload: &EventPayload, fired: I) -> Properties
where
    I: IntoIterator<Item = &'a ExtractionRule>,
{
    let consumed: BTreeSet<&str> = fired
        .into_iter()
        .map(|rule| rule.source_property.as_str())
        .collect();

    payload
        .properties
        .iter()
        .filter(|(key, _)| !consumed.contains(key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Results of metering a batch of events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    pub records: Vec<MeteredRecord>,
    pub failures: Vec<ExtractionError>,
    /// Ids of events with no configuration for their `(workspace, type)`
    pub unconfigured: Vec<String>,
}

/// Meter every event with the configuration its workspace defines for its type.
///
/// Events without a configuration are listed in `unconfigured` and otherwise
/// skipped; one event's failures never stop the rest of the batch.
#[instrument(skip_all, fields(events = events.len()))]
pub fn meter_batch<R>(events: &[EventPayload], resolver: &R, metered_at: DateTime<Utc>) -> BatchOutput
where
    R: ConfigResolver + ?Sized,
{
    let mut batch = BatchOutput::default();

    for event in events {
        let Some(config) = resolver.resolve(&event.scope.workspace_id, &event.event_type) else {
            debug!(event_id = %event.id, event_type = %event.event_type, "No metering configuration");
            batch.unconfigured.push(event.id.clone());
            continue;
        };

        let output = meter(event, config, metered_at);
        batch.records.extend(output.records);
        batch.failures.extend(output.failures);
    }

    debug!(
        records = batch.records.len(),
        failures = batch.failures.len(),
        unconfigured = batch.unconfigured.len(),
        "Metered batch"
    );
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::resolver::InMemoryConfigStore;
    use crate::extraction::rule::PropertyFilter;
    use chrono::TimeZone;
    use meterline_common::TenantScope;
    use rust_decimal_macros::dec;

    fn event_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 31, 0).unwrap()
    }

    fn api_event() -> EventPayload {
        EventPayload::new(
            "evt_1",
            TenantScope::new("ws_1", "production"),
            "api_request",
            "customer:cust_123",
            event_time(),
        )
        .with_properties([
            ("endpoint", "/x"),
            ("response_time_ms", "145"),
            ("region", "us-east"),
        ])
    }

    #[test]
    fn test_dimension_passthrough() {
        let config = MeteringConfig::new(vec![ExtractionRule::new(
            "response_time_ms",
            "milliseconds",
        )]);

        let output = meter(&api_event(), &config, now());
        assert!(output.is_clean());
        assert_eq!(output.records.len(), 1);

        let record = &output.records[0];
        assert_eq!(record.observation.quantity, dec!(145));
        assert_eq!(record.observation.quantity.to_string(), "145");
        assert_eq!(record.observation.unit, "milliseconds");
        assert!(record.observation.is_instant());
        assert_eq!(record.observed_at, event_time());
        assert_eq!(record.metered_at, now());
        assert_eq!(record.source_event_id, "evt_1");
        assert_eq!(
            record.dimensions,
            Properties::from([
                ("endpoint".to_string(), "/x".to_string()),
                ("region".to_string(), "us-east".to_string()),
            ])
        );
    }

    #[test]
    fn test_filter_gating_leaves_other_rules_firing() {
        let config = MeteringConfig::new(vec![
            ExtractionRule::new("response_time_ms", "premium_ms")
                .with_filter(PropertyFilter::equals("tier", "premium")),
            ExtractionRule::new("response_time_ms", "milliseconds"),
        ]);

        let missing_tier = meter(&api_event(), &config, now());
        assert!(missing_tier.is_clean());
        assert_eq!(missing_tier.records.len(), 1);
        assert_eq!(missing_tier.records[0].unit(), "milliseconds");

        let basic = meter(&api_event().with_property("tier", "basic"), &config, now());
        assert_eq!(basic.records.len(), 1);
        assert_eq!(basic.records[0].unit(), "milliseconds");
        assert_eq!(basic.records[0].dimensions.get("tier").map(String::as_str), Some("basic"));

        let premium = meter(&api_event().with_property("tier", "premium"), &config, now());
        assert_eq!(premium.records.len(), 2);
    }

    #[test]
    fn test_failures_are_per_rule() {
        let config = MeteringConfig::new(vec![
            ExtractionRule::new("bytes_sent", "bytes"),
            ExtractionRule::new("endpoint", "endpoints"),
            ExtractionRule::new("response_time_ms", "milliseconds"),
        ]);

        let output = meter(&api_event(), &config, now());
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].unit(), "milliseconds");
        assert_eq!(output.failures.len(), 2);
        assert_eq!(output.failures[0].kind, ExtractionErrorKind::MissingProperty);
        assert_eq!(output.failures[0].rule_index, 0);
        assert_eq!(
            output.failures[1].kind,
            ExtractionErrorKind::InvalidQuantity { value: "/x".into() }
        );
        assert_eq!(output.failures[1].event_id, "evt_1");
    }

    #[test]
    fn test_failed_rule_leaves_source_in_dimensions() {
        let config = MeteringConfig::new(vec![
            ExtractionRule::new("endpoint", "endpoints"),
            ExtractionRule::new("response_time_ms", "milliseconds"),
        ]);

        let output = meter(&api_event(), &config, now());
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.records.len(), 1);
        let dimensions = &output.records[0].dimensions;
        assert_eq!(dimensions.get("endpoint").map(String::as_str), Some("/x"));
        assert!(!dimensions.contains_key("response_time_ms"));
    }

    #[test]
    fn test_no_rules_is_success() {
        let output = meter(&api_event(), &MeteringConfig::default(), now());
        assert!(output.records.is_empty());
        assert!(output.is_clean());
    }

    #[test]
    fn test_filter_key_consumed_only_when_extracted() {
        let config = MeteringConfig::new(vec![
            ExtractionRule::new("response_time_ms", "milliseconds")
                .with_filter(PropertyFilter::equals("region", "us-east")),
        ]);
        let output = meter(&api_event(), &config, now());
        assert!(output.records[0].dimensions.contains_key("region"));
        assert!(!output.records[0].dimensions.contains_key("response_time_ms"));
    }

    #[test]
    fn test_idempotent_ids() {
        let config = MeteringConfig::new(vec![ExtractionRule::new(
            "response_time_ms",
            "milliseconds",
        )]);
        let first = meter(&api_event(), &config, now());
        let later = now() + chrono::Duration::hours(1);
        let second = meter(&api_event(), &config, later);

        assert_eq!(first.records[0].id, second.records[0].id);
        assert_eq!(first.records[0].observation, second.records[0].observation);
    }

    #[test]
    fn test_duplicate_units_get_distinct_ids() {
        let config = MeteringConfig::new(vec![
            ExtractionRule::new("response_time_ms", "milliseconds"),
            ExtractionRule::new("response_time_ms", "milliseconds"),
        ]);
        let output = meter(&api_event(), &config, now());
        assert_eq!(output.records.len(), 2);
        assert_ne!(output.records[0].id, output.records[1].id);
        assert_eq!(output.records[0].unit(), output.records[1].unit());
    }

    #[test]
    fn test_batch_collects_failures_and_unconfigured() {
        let mut store = InMemoryConfigStore::new();
        store
            .insert(
                "ws_1",
                "api_request",
                MeteringConfig::new(vec![ExtractionRule::new("response_time_ms", "milliseconds")]),
            )
            .unwrap();

        let broken = EventPayload::new(
            "evt_2",
            TenantScope::new("ws_1", "production"),
            "api_request",
            "customer:cust_123",
            event_time(),
        );
        let other_type = EventPayload::new(
            "evt_3",
            TenantScope::new("ws_1", "production"),
            "login",
            "customer:cust_123",
            event_time(),
        );

        let batch = meter_batch(&[api_event(), broken, other_type], &store, now());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].event_id, "evt_2");
        assert_eq!(batch.unconfigured, vec!["evt_3".to_string()]);
    }
}
