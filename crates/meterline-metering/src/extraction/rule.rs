//! Metering configuration - ordered extraction rules
//!
//! Rules are evaluated in list order and each fires independently; there is
//! no "first match wins".

use meterline_common::{ConfigError, Properties};
use serde::{Deserialize, Serialize};

/// Predicate gating an extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PropertyFilter {
    /// Property present and exactly equal to `value`
    Equals { property: String, value: String },
}

impl PropertyFilter {
    pub fn equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        PropertyFilter::Equals {
            property: property.into(),
            value: value.into(),
        }
    }

    /// Property key the filter reads
    pub fn property(&self) -> &str {
        match self {
            PropertyFilter::Equals { property, .. } => property,
        }
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            PropertyFilter::Equals { property, value } => {
                properties.get(property).is_some_and(|v| v == value)
            }
        }
    }
}

/// Extract `source_property` as a quantity of `unit`, optionally gated by `filter`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub source_property: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<PropertyFilter>,
}

impl ExtractionRule {
    pub fn new(source_property: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            source_property: source_property.into(),
            unit: unit.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: PropertyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// True when the rule has no filter or its filter matches
    pub fn applies_to(&self, properties: &Properties) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.matches(properties))
    }
}

/// Ordered set of extraction rules for one `(workspace, event type)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringConfig {
    #[serde(default)]
    pub extractions: Vec<ExtractionRule>,
}

impl MeteringConfig {
    pub fn new(extractions: Vec<ExtractionRule>) -> Self {
        Self { extractions }
    }

    /// Reject rules that could never produce a meaningful record
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, rule) in self.extractions.iter().enumerate() {
            if rule.source_property.trim().is_empty() {
                return Err(ConfigError::EmptySourceProperty { index });
            }
            if rule.unit.trim().is_empty() {
                return Err(ConfigError::EmptyUnit { index });
            }
            if let Some(filter) = &rule.filter {
                if filter.property().trim().is_empty() {
                    return Err(ConfigError::EmptyFilterProperty { index });
                }
            }
        }
        Ok(())
    }
}
