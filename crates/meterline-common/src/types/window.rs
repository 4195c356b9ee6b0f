//! Time windows - instants, measurement spans and billing buckets
//!
//! A [`TimeWindow`] is a pair of UTC instants with `start <= end`. The same
//! type serves two roles:
//! - Observation windows are closed points or spans of measurement
//!   ([`TimeWindow::contains_closed`]).
//! - Billing windows are half-open buckets `[start, end)`
//!   ([`TimeWindow::contains`]), usually produced by [`WindowSize`].

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WindowError;

/// Interval between two UTC instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = WindowError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        TimeWindow::new(raw.start, raw.end)
    }
}

impl TimeWindow {
    /// Window with `start <= end` (instant or span)
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Zero-length window at `at`
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Window with `start < end`
    pub fn span(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if end <= start {
            return Err(WindowError::EndNotAfterStart);
        }
        Ok(Self { start, end })
    }

    #[inline]
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn is_span(&self) -> bool {
        self.start < self.end
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open containment, `start <= at < end`
    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Closed containment, `start <= at <= end`
    #[inline]
    pub fn contains_closed(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// True when the half-open intervals share at least one instant
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Common span of two windows, if any
    pub fn intersection(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeWindow { start, end })
    }

    /// Length of the common span, zero when disjoint
    pub fn overlap_duration(&self, other: &TimeWindow) -> Duration {
        self.intersection(other)
            .map(|w| w.duration())
            .unwrap_or_else(Duration::zero)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Tumbling billing window size, aligned to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSize {
    Minute,
    Hour,
    Day,
    /// Fixed number of seconds
    Seconds(u64),
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize::Hour
    }
}

impl WindowSize {
    /// Length of one window in seconds
    pub fn as_seconds(&self) -> Result<i64, WindowError> {
        let secs = match self {
            WindowSize::Minute => 60,
            WindowSize::Hour => 3_600,
            WindowSize::Day => 86_400,
            WindowSize::Seconds(s) => i64::try_from(*s).map_err(|_| WindowError::Overflow)?,
        };
        if secs <= 0 {
            return Err(WindowError::NonPositiveSize);
        }
        Ok(secs)
    }

    /// Billing window `[start, end)` that contains `at`
    pub fn bucket_for(&self, at: DateTime<Utc>) -> Result<TimeWindow, WindowError> {
        let secs = self.as_seconds()?;
        let start_secs = at.timestamp().div_euclid(secs) * secs;
        let start = DateTime::from_timestamp(start_secs, 0).ok_or(WindowError::Overflow)?;
        let end = start
            .checked_add_signed(Duration::try_seconds(secs).ok_or(WindowError::Overflow)?)
            .ok_or(WindowError::Overflow)?;
        Ok(TimeWindow { start, end })
    }

    /// Consecutive billing windows covering `[from, to)`
    pub fn windows_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>, WindowError> {
        let mut windows = Vec::new();
        if from >= to {
            return Ok(windows);
        }

        let mut current = self.bucket_for(from)?;
        while current.start < to {
            windows.push(current);
            current = self.bucket_for(current.end)?;
        }
        Ok(windows)
    }
}
