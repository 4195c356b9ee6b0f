//! Extraction module
//!
//! Turns raw events into metered records:
//! - MeteringConfig: ordered, optionally filtered extraction rules
//! - meter / meter_batch: the pure extraction engine
//! - ConfigResolver: configuration lookup by workspace and event type

pub mod meter;
pub mod resolver;
pub mod rule;

pub use meter::{meter, meter_batch, BatchOutput, MeterOutput};
pub use resolver::{ConfigDocument, ConfigResolver, InMemoryConfigStore};
pub use rule::{ExtractionRule, MeteringConfig, PropertyFilter};
