//! Watermarks for incremental re-aggregation
//!
//! A reading remembers the newest `metered_at` among its records. Records
//! processed after that instant, or a changed record count, mean the reading
//! is stale and its bucket should be reduced again. Re-reduction yields the
//! same reading id, so persisting the new reading replaces the old one.

use chrono::{DateTime, Utc};
use meterline_common::{MeterReading, MeteredRecord};

/// Newest processing time among `records`
pub fn watermark(records: &[MeteredRecord]) -> Option<DateTime<Utc>> {
    records.iter().map(|r| r.metered_at).max()
}

/// Records processed after the reading's watermark
pub fn arrived_after<'a>(
    reading: &MeterReading,
    records: &'a [MeteredRecord],
) -> impl Iterator<Item = &'a MeteredRecord> {
    let mark = reading.max_metered_at;
    records.iter().filter(move |r| r.metered_at > mark)
}

/// True when `records` (the bucket's current contents) would change `reading`
pub fn needs_reaggregation(reading: &MeterReading, records: &[MeteredRecord]) -> bool {
    if records.is_empty() {
        // A carried-forward reading has nothing to compare against
        return false;
    }
    reading.record_count != records.len() as u64 || arrived_after(reading, records).next().is_some()
}
