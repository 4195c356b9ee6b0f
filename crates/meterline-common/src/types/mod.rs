//! Core data types for Meterline

pub mod event;
pub mod ids;
pub mod observation;
pub mod quantity;
pub mod record;
pub mod scope;
pub mod window;

pub use record::AggregationKind;
