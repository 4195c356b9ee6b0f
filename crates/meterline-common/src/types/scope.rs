//! Tenant scoping - workspace, universe and subject identity
//!
//! A workspace owns event types and metering configurations. A universe
//! (production, test, simulation) namespaces subjects: the same subject string
//! in two universes is two different billing entities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `(workspace, universe)` pair every event, record and reading belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantScope {
    /// Owning workspace
    pub workspace_id: String,
    /// Isolated universe inside the workspace (e.g. production, test)
    pub universe_id: String,
}

impl TenantScope {
    pub fn new(workspace_id: impl Into<String>, universe_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            universe_id: universe_id.into(),
        }
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace_id, self.universe_id)
    }
}

/// Billing-attribution entity, conventionally `"type:id"` (e.g. `customer:cust_123`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first `:`, if the subject follows the `type:id` form
    pub fn kind(&self) -> Option<&str> {
        self.0.split_once(':').map(|(kind, _)| kind)
    }

    /// Part after the first `:`, or the whole subject
    pub fn local_id(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, id)| id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Subject {
    fn from(value: String) -> Self {
        Self(value)
    }
}
