//! Meterline service settings

use anyhow::{Context, Result};
use meterline_common::{AggregationKind, ConfigError, WindowSize, DEFAULT_AVERAGE_SCALE};
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationPolicy;

/// Environment variable naming the settings file (without extension)
pub const SETTINGS_PATH_ENV: &str = "METERLINE_CONFIG";

/// Prefix for environment overrides, e.g. `METERLINE__AVERAGE_SCALE=6`
pub const ENV_PREFIX: &str = "METERLINE";

/// Meterline batch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterlineSettings {
    /// Billing window size
    pub window: WindowSize,
    /// Aggregation strategy per unit
    pub aggregation: AggregationPolicy,
    /// Decimal places kept by time-weighted averages
    pub average_scale: u32,
    /// Input locations
    pub input: InputSettings,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MeterlineSettings {
    fn default() -> Self {
        Self {
            window: WindowSize::Hour,
            aggregation: AggregationPolicy::new(AggregationKind::Sum),
            average_scale: DEFAULT_AVERAGE_SCALE,
            input: InputSettings::default(),
            log_filter: "meterline_metering=info".to_string(),
        }
    }
}

impl MeterlineSettings {
    /// Load settings from `.env`, an optional settings file and `METERLINE__*`
    /// environment variables, in increasing priority.
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let path = std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| "meterline".to_string());
        let settings: MeterlineSettings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("reading settings from {path}"))?
            .try_deserialize()
            .context("deserializing settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window
            .as_seconds()
            .map_err(|e| ConfigError::Invalid(format!("window: {e}")))?;
        if self.average_scale > meterline_common::types::quantity::MAX_SCALE {
            return Err(ConfigError::Invalid(format!(
                "average_scale {} exceeds {}",
                self.average_scale,
                meterline_common::types::quantity::MAX_SCALE
            )));
        }
        Ok(())
    }
}

/// Where the batch binary reads its inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Events as a JSON array or JSON lines
    pub events_path: String,
    /// Metering configurations as a JSON array of documents
    pub configs_path: String,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            events_path: "events.jsonl".to_string(),
            configs_path: "metering.json".to_string(),
        }
    }
}
