//! # Meterline Metering
//!
//! Extraction and aggregation engines for multi-tenant usage metering.
//!
//! ## Data Flow
//!
//! ```text
//! EventPayload + MeteringConfig
//!         │
//!         ▼
//!   extraction::meter        (per-rule failures collected, never abort)
//!         │  MeteredRecord*
//!         ▼
//!   RecordBuckets            (scope, subject, unit, billing window)
//!         │  Bucket*
//!         ▼
//!   Aggregator / BucketReducer   (sum, max, min, latest, time-weighted-avg)
//!         │
//!         ▼
//!   MeterReading
//! ```
//!
//! Both engines are synchronous and pure. Processing time is passed in by the
//! caller; record and reading ids are derived from business keys, so replays
//! are safe.

pub mod aggregation;
pub mod error;
pub mod extraction;
pub mod input;
pub mod settings;

pub use aggregation::{
    AggregationPolicy, Aggregator, Bucket, BucketInput, BucketKey, BucketReducer, CarryForward,
    RecordBuckets, ReductionReport,
};
pub use error::{AggregationError, ExtractionError, ExtractionErrorKind};
pub use extraction::{
    meter, meter_batch, BatchOutput, ConfigResolver, ExtractionRule, InMemoryConfigStore,
    MeterOutput, MeteringConfig, PropertyFilter,
};
pub use settings::MeterlineSettings;
