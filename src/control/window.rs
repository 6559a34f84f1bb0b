//! Time-of-day windows and hysteresis bands.
//!
//! A [`DutyWindow`] is a half-open interval `[start, end)` on the 24 h
//! cyclic clock.  When `start > end` the window wraps across midnight
//! (e.g. 22:00–06:00).  `start == end` denotes the whole day.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SECS_PER_DAY: u32 = 24 * 3600;

/// Time-of-day interval during which something is permitted or selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DutyWindow {
    /// Window from `start_h:start_m` to `end_h:end_m`.  Falls back to the
    /// full day if either bound is not a valid clock time.
    pub fn hm(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> Self {
        match (
            NaiveTime::from_hms_opt(start_h, start_m, 0),
            NaiveTime::from_hms_opt(end_h, end_m, 0),
        ) {
            (Some(start), Some(end)) => Self { start, end },
            _ => Self::always(),
        }
    }

    /// The whole day.
    pub fn always() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    /// True if `t` is on duty.
    pub fn contains(&self, t: NaiveTime) -> bool {
        let s = secs_of_day(self.start);
        let e = secs_of_day(self.end);
        let t = secs_of_day(t);
        if s == e {
            true
        } else if s < e {
            t >= s && t < e
        } else {
            // Wraps around midnight.
            t >= s || t < e
        }
    }

    /// Length of the window in seconds (full day for `start == end`).
    pub fn duration_secs(&self) -> u32 {
        let s = secs_of_day(self.start);
        let e = secs_of_day(self.end);
        if s == e {
            SECS_PER_DAY
        } else {
            (e + SECS_PER_DAY - s) % SECS_PER_DAY
        }
    }
}

impl core::fmt::Display for DutyWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[{}-{})",
            self.start.format("%H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}

fn secs_of_day(t: NaiveTime) -> u32 {
    // Leap-second representations collapse onto the last regular second.
    t.num_seconds_from_midnight().min(SECS_PER_DAY - 1)
}

/// Where a value sits relative to a [`Band`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

/// Hysteresis band `[low, high]`.  Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f32,
    pub high: f32,
}

impl Band {
    /// Validated constructor.
    pub fn new(low: f32, high: f32) -> Result<Self> {
        let band = Self { low, high };
        band.validate()?;
        Ok(band)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(Error::Config("band bounds must be finite"));
        }
        if self.low > self.high {
            return Err(Error::Config("band low must not exceed high"));
        }
        Ok(())
    }

    /// Classify `v`.  Comparisons are strict so boundary values are `Within`.
    pub fn classify(&self, v: f32) -> BandPosition {
        if v < self.low {
            BandPosition::Below
        } else if v > self.high {
            BandPosition::Above
        } else {
            BandPosition::Within
        }
    }
}

impl core::fmt::Display for Band {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:.1}, {:.1}]", self.low, self.high)
    }
}
