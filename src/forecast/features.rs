//! Feature engineering for forecasting models
//!
//! Calendar, weather and lag/rolling features extracted from meter series.
//! Column helpers operate on `Option<f64>` so that gaps propagate the same way
//! a missing target does, and are filled in one pass at the end.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::weather::WeatherPoint;

/// Calendar attributes of a timestamp in the meter's local time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    /// Hour of day (0-23)
    pub hour: u32,
    /// Day of week (0=Monday, 6=Sunday)
    pub day_of_week: u32,
    /// Quarter of year (1-4)
    pub quarter: u32,
    /// Month (1-12)
    pub month: u32,
    pub year: i32,
    /// Day of year (1-366)
    pub day_of_year: u32,
    /// Day of month (1-31)
    pub day_of_month: u32,
    /// ISO week number (1-53)
    pub week_of_year: u32,
    pub is_weekend: bool,
}

/// Weather inputs, zero when the provider had nothing for the timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherFeatures {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub dew_point_c: f64,
    pub precipitation_mm: f64,
    pub cloud_cover_percent: f64,
}

impl WeatherFeatures {
    pub fn from_point(point: Option<&WeatherPoint>) -> Self {
        match point {
            Some(p) => Self {
                temperature_c: p.temperature_c.unwrap_or(0.0),
                humidity_percent: p.humidity_percent.unwrap_or(0.0),
                dew_point_c: p.dew_point_c.unwrap_or(0.0),
                precipitation_mm: p.precipitation_mm.unwrap_or(0.0),
                cloud_cover_percent: p.cloud_cover_percent.unwrap_or(0.0),
            },
            None => Self::default(),
        }
    }

    pub fn with_temperature_shift(mut self, delta_c: f64) -> Self {
        self.temperature_c += delta_c;
        self
    }
}

/// Feature extractor for a meter's local timezone.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    timezone: Tz,
}

impl FeatureExtractor {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Extract calendar features from a timestamp
    pub fn calendar(&self, timestamp: DateTime<Utc>) -> CalendarFeatures {
        let local = timestamp.with_timezone(&self.timezone);
        let month = local.month();
        let day_of_week = local.weekday().num_days_from_monday();

        CalendarFeatures {
            hour: local.hour(),
            day_of_week,
            quarter: (month - 1) / 3 + 1,
            month,
            year: local.year(),
            day_of_year: local.ordinal(),
            day_of_month: local.day(),
            week_of_year: local.iso_week().week(),
            is_weekend: day_of_week >= 5,
        }
    }
}

/// `out[i] = values[i - lag]`, `None` where the lag reaches before the start.
pub fn lagged(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= lag { values[i - lag] } else { None })
        .collect()
}

/// Mean of the `window` values strictly before each position.
///
/// The current value is never included. A window with any gap yields `None`.
pub fn trailing_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = trailing_window(values, i, window)?;
            Some(w.iter().sum::<f64>() / w.len() as f64)
        })
        .collect()
}

/// Sample standard deviation of the `window` values strictly before each
/// position. Needs at least two values.
pub fn trailing_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window < 2 {
                return None;
            }
            let w = trailing_window(values, i, window)?;
            let mean = w.iter().sum::<f64>() / w.len() as f64;
            let variance = w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64;
            Some(variance.sqrt())
        })
        .collect()
}

fn trailing_window(values: &[Option<f64>], i: usize, window: usize) -> Option<Vec<f64>> {
    if window == 0 || i < window {
        return None;
    }
    values[i - window..i].iter().copied().collect()
}

/// Fill gaps backward from the next known value, then forward from the last
/// known value. A column with no known values becomes all zeros.
pub fn fill_gaps(column: &[Option<f64>]) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = column.to_vec();

    let mut next = None;
    for v in filled.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }

    let mut prev = None;
    for v in filled.iter_mut() {
        match v {
            Some(x) => prev = Some(*x),
            None => *v = prev,
        }
    }

    filled.into_iter().map(|v| v.unwrap_or(0.0)).collect()
}
