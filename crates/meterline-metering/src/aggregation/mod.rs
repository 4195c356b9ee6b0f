//! Aggregation module
//!
//! Reduces metered records to windowed meter readings:
//! - Aggregator: pure reducer over one homogeneous bucket
//! - RecordBuckets: groups records by key and billing window
//! - BucketReducer: reduces many buckets with a per-unit strategy policy
//! - watermark: detects readings made stale by late records

pub mod engine;
pub mod grouping;
pub mod reducer;
pub mod watermark;

pub use engine::{Aggregator, BucketInput, BucketKey, CarryForward};
pub use grouping::{Bucket, BucketId, RecordBuckets};
pub use reducer::{AggregationPolicy, BucketFailure, BucketReducer, ReductionReport};
pub use watermark::{arrived_after, needs_reaggregation, watermark};
