//! # Meterline Common
//!
//! Shared data model for the Meterline usage-metering engines.
//!
//! ## Core Types
//!
//! - [`Quantity`]: exact decimal value with checked arithmetic and allocation
//! - [`TimeWindow`]/[`WindowSize`]: instants, spans and tumbling billing windows
//! - [`TenantScope`]/[`Subject`]: workspace + universe scoping and billing identity
//! - [`EventPayload`]: raw usage event with untyped string properties
//! - [`Observation`]/[`Aggregate`]: extracted and reduced values
//! - [`MeteredRecord`]/[`MeterReading`]: engine outputs with deterministic ids

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConfigError, MeterlineError, QuantityError, Result, WindowError};
pub use types::{
    event::{EventPayload, Properties},
    ids::{ReadingId, RecordId},
    observation::{Aggregate, Observation},
    quantity::Quantity,
    record::{AggregationKind, MeterReading, MeteredRecord},
    scope::{Subject, TenantScope},
    window::{TimeWindow, WindowSize},
};

/// Meterline version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decimal places kept by a time-weighted average unless configured otherwise
pub const DEFAULT_AVERAGE_SCALE: u32 = 12;
