use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped measurement from one meter.
///
/// `energy_kwh_import` is the forecasting target. It may be missing for a
/// sample (meter gap, failed read); the remaining channels are carried along
/// for storage and are never used as model inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub meter_id: String,
    pub timestamp: DateTime<Utc>,
    pub energy_kwh_import: Option<f64>,
    #[serde(default, flatten)]
    pub channels: AuxiliaryChannels,
}

/// Electrical channels reported alongside the energy register.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryChannels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_vrn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_vyn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_vbn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ir: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_iy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ib: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_kvah_import: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_kwh_export: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_kvah_export: Option<f64>,
}

impl Reading {
    pub fn new(meter_id: impl Into<String>, timestamp: DateTime<Utc>, energy_kwh_import: f64) -> Self {
        Self {
            meter_id: meter_id.into(),
            timestamp,
            energy_kwh_import: Some(energy_kwh_import),
            channels: AuxiliaryChannels::default(),
        }
    }

    /// A reading whose energy register could not be read.
    pub fn missing(meter_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            meter_id: meter_id.into(),
            timestamp,
            energy_kwh_import: None,
            channels: AuxiliaryChannels::default(),
        }
    }

    /// `(timestamp, value)` if the target is present.
    pub fn observation(&self) -> Option<(DateTime<Utc>, f64)> {
        self.energy_kwh_import
            .filter(|v| v.is_finite())
            .map(|v| (self.timestamp, v))
    }
}

/// A known meter and the span of its stored readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub meter_id: String,
    pub reading_count: u64,
    pub first_reading: Option<DateTime<Utc>>,
    pub last_reading: Option<DateTime<Utc>>,
}

/// Ordered readings for one meter over `[start, end)`.
#[derive(Debug, Clone)]
pub struct HistoricalWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    readings: Vec<Reading>,
}

impl HistoricalWindow {
    /// Builds a window from unordered readings. Readings outside `[start, end)`
    /// are dropped and duplicate timestamps keep the first occurrence.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, readings: Vec<Reading>) -> Self {
        let mut readings: Vec<Reading> = readings
            .into_iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        readings.dedup_by_key(|r| r.timestamp);

        Self {
            start,
            end,
            readings,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings.first().map(|r| r.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings.last().map(|r| r.timestamp)
    }
}
