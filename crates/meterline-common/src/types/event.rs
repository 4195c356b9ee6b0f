//! Event payloads - raw, schema-flexible usage input

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scope::{Subject, TenantScope};

/// Untyped event properties, ordered by key for deterministic iteration
pub type Properties = BTreeMap<String, String>;

/// Usage event as delivered by a producer
///
/// `id` is the producer's idempotency key, unique within `scope`. Missing
/// `properties` deserialize to an empty map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: String,
    pub scope: TenantScope,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: Subject,
    #[serde(rename = "time")]
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub properties: Properties,
}

impl EventPayload {
    /// Create an event with no properties
    pub fn new(
        id: impl Into<String>,
        scope: TenantScope,
        event_type: impl Into<String>,
        subject: impl Into<Subject>,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            event_type: event_type.into(),
            subject: subject.into(),
            event_time,
            properties: Properties::new(),
        }
    }

    /// Set a single property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replace all properties
    pub fn with_properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Property lookup; `None` when absent
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
