//! Metering configuration lookup
//!
//! Which configuration applies to an event is decided by the workspace and
//! event type. The engines never perform the lookup themselves; batch callers
//! go through [`ConfigResolver`].

use std::collections::HashMap;

use meterline_common::ConfigError;
use serde::{Deserialize, Serialize};

use super::rule::MeteringConfig;

/// Source of metering configurations keyed by `(workspace, event type)`
pub trait ConfigResolver {
    fn resolve(&self, workspace_id: &str, event_type: &str) -> Option<&MeteringConfig>;
}

/// Serialized form of one stored configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub workspace_id: String,
    pub event_type: String,
    #[serde(flatten)]
    pub config: MeteringConfig,
}

/// In-memory configuration store
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigStore {
    configs: HashMap<(String, String), MeteringConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from documents, validating each configuration
    pub fn from_documents<I>(documents: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = ConfigDocument>,
    {
        let mut store = Self::new();
        for doc in documents {
            store.insert(doc.workspace_id, doc.event_type, doc.config)?;
        }
        Ok(store)
    }

    /// Validate and store a configuration, replacing any previous one
    pub fn insert(
        &mut self,
        workspace_id: impl Into<String>,
        event_type: impl Into<String>,
        config: MeteringConfig,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        self.configs
            .insert((workspace_id.into(), event_type.into()), config);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl ConfigResolver for InMemoryConfigStore {
    fn resolve(&self, workspace_id: &str, event_type: &str) -> Option<&MeteringConfig> {
        self.configs
            .get(&(workspace_id.to_string(), event_type.to_string()))
    }
}
