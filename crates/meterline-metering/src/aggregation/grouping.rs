//! Record grouping with DashMap
//!
//! Groups metered records by scope, subject, unit and billing window so each
//! bucket can be reduced independently. Records are keyed by their
//! deterministic id inside a bucket, which makes redelivery a no-op.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meterline_common::{MeteredRecord, RecordId, TimeWindow, WindowError, WindowSize};
use tracing::{debug, info, instrument};

use super::engine::BucketKey;

/// Bucket identity: key plus billing window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId {
    pub key: BucketKey,
    pub window: TimeWindow,
}

/// Materialized bucket, records in id order
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub id: BucketId,
    pub records: Vec<MeteredRecord>,
}

/// Concurrent record accumulator
pub struct RecordBuckets {
    window_size: WindowSize,
    buckets: Arc<DashMap<BucketId, BTreeMap<RecordId, MeteredRecord>>>,
}

impl RecordBuckets {
    pub fn new(window_size: WindowSize) -> Self {
        Self {
            window_size,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn window_size(&self) -> WindowSize {
        self.window_size
    }

    /// Add a record to its bucket. Returns `false` when a record with the same
    /// id was already present.
    pub fn insert(&self, record: MeteredRecord) -> Result<bool, WindowError> {
        let id = BucketId {
            key: BucketKey::of(&record),
            window: self.window_size.bucket_for(record.observed_at)?,
        };

        let mut bucket = self.buckets.entry(id).or_default();
        match bucket.entry(record.id) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    /// Insert many records, returning how many were new
    #[instrument(skip_all)]
    pub fn extend<I>(&self, records: I) -> Result<usize, WindowError>
    where
        I: IntoIterator<Item = MeteredRecord>,
    {
        let mut added = 0;
        let mut duplicates = 0;
        for record in records {
            if self.insert(record)? {
                added += 1;
            } else {
                duplicates += 1;
            }
        }
        debug!(added, duplicates, buckets = self.buckets.len(), "Grouped records");
        Ok(added)
    }

    /// Remove and return every bucket whose window ends at or before `watermark`
    #[instrument(skip(self))]
    pub fn close_before(&self, watermark: DateTime<Utc>) -> Vec<Bucket> {
        let mut closed = Vec::new();

        self.buckets.retain(|id, records| {
            if id.window.end <= watermark {
                closed.push(Bucket {
                    id: id.clone(),
                    records: std::mem::take(records).into_values().collect(),
                });
                false
            } else {
                true
            }
        });

        closed.sort_by(|a, b| a.id.cmp(&b.id));
        info!(closed_count = closed.len(), "Closed billing windows");
        closed
    }

    /// Copy of every bucket, sorted by key then window
    pub fn snapshot(&self) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = self
            .buckets
            .iter()
            .map(|entry| Bucket {
                id: entry.key().clone(),
                records: entry.value().values().cloned().collect(),
            })
            .collect();
        buckets.sort_by(|a, b| a.id.cmp(&b.id));
        buckets
    }

    /// Records currently held for one bucket
    pub fn get(&self, id: &BucketId) -> Option<Vec<MeteredRecord>> {
        self.buckets
            .get(id)
            .map(|records| records.values().cloned().collect())
    }

    /// Number of open buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop all buckets
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Clone for RecordBuckets {
    fn clone(&self) -> Self {
        Self {
            window_size: self.window_size,
            buckets: Arc::clone(&self.buckets),
        }
    }
}
