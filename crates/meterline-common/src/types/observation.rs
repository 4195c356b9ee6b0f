//! Observations and aggregates - the two result shapes
//!
//! An [`Observation`] is one timed, unit-bearing measurement. An
//! [`Aggregate`] is a reduced value; its window lives on the reading that
//! carries it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;
use super::window::TimeWindow;
use crate::error::WindowError;

/// Extracted quantity with unit and measurement window
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    /// Measured amount
    pub quantity: Quantity,
    /// Unit the amount is expressed in
    pub unit: String,
    /// Instant or span the measurement covers
    pub window: TimeWindow,
}

impl Observation {
    /// Point-in-time observation, `window.start == window.end == at`
    pub fn new_instant(quantity: Quantity, unit: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            quantity,
            unit: unit.into(),
            window: TimeWindow::instant(at),
        }
    }

    /// Observation measured over `[start, end]`; `end` must be after `start`
    pub fn new_span(
        quantity: Quantity,
        unit: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, WindowError> {
        Ok(Self {
            quantity,
            unit: unit.into(),
            window: TimeWindow::span(start, end)?,
        })
    }

    #[inline]
    pub fn is_instant(&self) -> bool {
        self.window.is_instant()
    }
}

/// Reduced quantity with unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    /// Reduced amount
    pub quantity: Quantity,
    /// Unit shared by every contributing record
    pub unit: String,
}

impl Aggregate {
    pub fn new(quantity: Quantity, unit: impl Into<String>) -> Self {
        Self {
            quantity,
            unit: unit.into(),
        }
    }
}
