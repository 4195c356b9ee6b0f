//! Deterministic identifiers
//!
//! Record and reading ids are pure functions of their business keys, so
//! independent workers agree on ids without coordination and replays upsert
//! instead of duplicating. Each id is the first 16 bytes of a BLAKE3 digest
//! over a domain tag and length-prefixed components, stamped as a UUIDv8.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scope::{Subject, TenantScope};
use super::window::TimeWindow;
use super::AggregationKind;

const RECORD_DOMAIN: &str = "meterline.record.v1";
const READING_DOMAIN: &str = "meterline.reading.v1";

/// Hash `parts` under `domain` into a version 8 UUID
fn derive_uuid(domain: &str, parts: &[&[u8]]) -> Uuid {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.as_bytes());
    for part in parts {
        // Length prefix keeps ("ab", "c") distinct from ("a", "bc")
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x80;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

fn instant_bytes(at: &DateTime<Utc>) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    bytes[..8].copy_from_slice(&at.timestamp().to_le_bytes());
    bytes[8..].copy_from_slice(&at.timestamp_subsec_nanos().to_le_bytes());
    bytes
}

/// Metered record id, derived from `(scope, event id, unit, occurrence)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// `occurrence` counts earlier records with the same unit produced from the
    /// same event; the first one uses 0.
    pub fn derive(scope: &TenantScope, event_id: &str, unit: &str, occurrence: u32) -> Self {
        let occurrence = occurrence.to_le_bytes();
        Self(derive_uuid(
            RECORD_DOMAIN,
            &[
                scope.workspace_id.as_bytes(),
                scope.universe_id.as_bytes(),
                event_id.as_bytes(),
                unit.as_bytes(),
                &occurrence,
            ],
        ))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Meter reading id, derived from `(scope, subject, unit, window, strategy)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(Uuid);

impl ReadingId {
    pub fn derive(
        scope: &TenantScope,
        subject: &Subject,
        unit: &str,
        window: &TimeWindow,
        kind: AggregationKind,
    ) -> Self {
        let start = instant_bytes(&window.start);
        let end = instant_bytes(&window.end);
        Self(derive_uuid(
            READING_DOMAIN,
            &[
                scope.workspace_id.as_bytes(),
                scope.universe_id.as_bytes(),
                subject.as_str().as_bytes(),
                unit.as_bytes(),
                &start,
                &end,
                kind.as_str().as_bytes(),
            ],
        ))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
