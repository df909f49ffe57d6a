//! The discretized time domain of a run.
//!
//! Every series in a run is aligned to one [`TimeIndex`]: the same number of
//! values, one per timestamp. Resampling onto the index is the regularizer's job
//! and never happens inside the core.

use crate::errors::{HydroError, HydroResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub type FloatValue = f64;
pub type Time = DateTime<Utc>;

/// A time step given as calendar-free components, e.g. `{ days = 1 }` or `{ hours = 6 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Interval {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Interval {
    pub fn days(days: i64) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    pub fn hours(hours: i64) -> Self {
        Self {
            hours,
            ..Default::default()
        }
    }

    pub fn total_seconds(&self) -> i64 {
        ((self.days * 24 + self.hours) * 60 + self.minutes) * 60 + self.seconds
    }

    pub fn to_duration(&self) -> Duration {
        Duration::seconds(self.total_seconds())
    }
}

/// Uniform time grid `start, start + step, ...` up to and including `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeIndex {
    start: Time,
    end: Time,
    step: Interval,
    forecast_date: Option<Time>,
}

impl TimeIndex {
    pub fn new(start: Time, end: Time, step: Interval) -> HydroResult<Self> {
        if step.total_seconds() <= 0 {
            return Err(HydroError::Configuration(format!(
                "time step must be positive, got {} s",
                step.total_seconds()
            )));
        }
        if start >= end {
            return Err(HydroError::Configuration(format!(
                "time index start ({start}) must be before end ({end})"
            )));
        }
        Ok(Self {
            start,
            end,
            step,
            forecast_date: None,
        })
    }

    pub fn with_forecast_date(mut self, forecast_date: Option<Time>) -> Self {
        self.forecast_date = forecast_date;
        self
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn end(&self) -> Time {
        self.end
    }

    pub fn step(&self) -> Interval {
        self.step
    }

    pub fn step_seconds(&self) -> FloatValue {
        self.step.total_seconds() as FloatValue
    }

    pub fn forecast_date(&self) -> Option<Time> {
        self.forecast_date
    }

    pub fn len(&self) -> usize {
        if self.step.total_seconds() <= 0 || self.end < self.start {
            return 0;
        }
        ((self.end - self.start).num_seconds() / self.step.total_seconds()) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the `i`-th step.
    pub fn at(&self, i: usize) -> Option<Time> {
        if i >= self.len() {
            return None;
        }
        let offset = i64::try_from(i)
            .ok()
            .and_then(|i| self.step.total_seconds().checked_mul(i))
            .and_then(Duration::try_seconds)?;
        self.start.checked_add_signed(offset)
    }

    pub fn times(&self) -> impl Iterator<Item = Time> + '_ {
        (0..self.len()).filter_map(move |i| self.at(i))
    }

    /// Position of `t` in the index. Only exact matches are accepted.
    pub fn position(&self, t: Time) -> Option<usize> {
        if t < self.start || t > self.end {
            return None;
        }
        let offset = (t - self.start).num_seconds();
        let step = self.step.total_seconds();
        if offset % step != 0 {
            return None;
        }
        Some((offset / step) as usize)
    }

    /// Range of indexes whose timestamps fall within `[from, to]`.
    pub fn window(&self, from: Time, to: Time) -> Range<usize> {
        let mut lo = self.len();
        let mut hi = 0;
        for (i, t) in self.times().enumerate() {
            if t >= from && lo == self.len() {
                lo = i;
            }
            if t <= to {
                hi = i + 1;
            }
        }
        lo..hi.max(lo)
    }

    /// True if the step lies strictly after the forecast date.
    pub fn is_forecast(&self, i: usize) -> bool {
        match (self.forecast_date, self.at(i)) {
            (Some(forecast_date), Some(t)) => t > forecast_date,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Time {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn inclusive_end() {
        let index = TimeIndex::new(day(1), day(14), Interval::days(1)).unwrap();
        assert_eq!(index.len(), 14);
        assert_eq!(index.at(0), Some(day(1)));
        assert_eq!(index.at(13), Some(day(14)));
        assert_eq!(index.at(14), None);
    }

    #[test]
    fn long_index_keeps_full_offsets() {
        let start = Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        let index = TimeIndex::new(start, end, Interval {
            seconds: 1,
            ..Default::default()
        })
        .unwrap();
        assert!(index.len() > i32::MAX as usize);
        assert_eq!(index.at(index.len() - 1), Some(end));
        assert_eq!(index.position(end), Some(index.len() - 1));
    }

    #[test]
    fn invalid_index() {
        assert!(TimeIndex::new(day(2), day(1), Interval::days(1)).is_err());
        assert!(TimeIndex::new(day(1), day(2), Interval::default()).is_err());
    }

    #[test]
    fn position_requires_alignment() {
        let index = TimeIndex::new(day(1), day(5), Interval::days(1)).unwrap();
        assert_eq!(index.position(day(3)), Some(2));
        assert_eq!(
            index.position(Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap()),
            None
        );
        assert_eq!(index.position(day(6)), None);
    }

    #[test]
    fn window_and_forecast() {
        let index = TimeIndex::new(day(1), day(10), Interval::days(1))
            .unwrap()
            .with_forecast_date(Some(day(7)));
        assert_eq!(index.window(day(3), day(5)), 2..5);
        assert_eq!(index.window(day(9), day(20)), 8..10);
        assert!(!index.is_forecast(6));
        assert!(index.is_forecast(7));
    }

    #[test]
    fn serialise_round_trip() {
        let index = TimeIndex::new(day(1), day(3), Interval::hours(6)).unwrap();
        let json = serde_json::to_string(&index).unwrap();
        let parsed: TimeIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 9);
    }
}
