//! Autoregressive LSTM forecaster
//!
//! Uses a pre-trained network and scaler loaded from disk. Prediction walks
//! the window one step at a time: each step builds a feature table over the
//! tail of a working buffer, runs the last [`SEQUENCE_LENGTH`] rows through
//! the network and appends the result to the buffer so later steps see it as
//! history.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use ndarray::Array2;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{demand_factor, step_grid, temperature_shift, EventOverride, PredictionPoint, Reading};
use crate::forecast::{
    fill_gaps, lagged, trailing_mean, trailing_std, FeatureExtractor, WeatherFeatures,
    WeatherSeries,
};
use crate::ml::registry::AUTOREGRESSIVE_MODEL;
use crate::ml::{ForecastModel, LstmNetwork, MinMaxScaler, ModelContext, ModelError};

/// Rows fed to the network per step.
pub const SEQUENCE_LENGTH: usize = 48;
/// One day at 30-minute resolution.
pub const DAILY_LAG: usize = 48;
/// One week at 30-minute resolution.
pub const WEEKLY_LAG: usize = 336;
pub const SHORT_ROLLING_WINDOW: usize = 6;
pub const LONG_ROLLING_WINDOW: usize = 48;
/// Records needed to fill the longest lag for every row of a sequence.
pub const REQUIRED_HISTORY: usize = WEEKLY_LAG + SEQUENCE_LENGTH;
/// Resolution of the working buffer.
pub const BUFFER_INTERVAL_MINUTES: i64 = 30;

pub const AUTOREGRESSIVE_FEATURES: [&str; 17] = [
    "energy_kwh",
    "temperature_c",
    "humidity_percent",
    "dew_point_c",
    "precipitation_mm",
    "cloud_cover_percent",
    "hour",
    "day_of_week",
    "day_of_year",
    "week_of_year",
    "month",
    "is_weekend",
    "lag_kwh_48",
    "lag_kwh_336",
    "rolling_mean_kwh_6",
    "rolling_std_kwh_6",
    "rolling_mean_kwh_48",
];

const TARGET_INDEX: usize = 0;
const N_FEATURES: usize = AUTOREGRESSIVE_FEATURES.len();

pub struct AutoregressiveForecastModel {
    extractor: FeatureExtractor,
    network: Arc<LstmNetwork>,
    scaler: Arc<MinMaxScaler>,
    weather: WeatherSeries,
}

impl AutoregressiveForecastModel {
    pub fn new(
        network: Arc<LstmNetwork>,
        scaler: Arc<MinMaxScaler>,
        timezone: Tz,
    ) -> Result<Self, ModelError> {
        let mismatch = |what: &str, got: usize| ModelError::LoadFailed {
            name: AUTOREGRESSIVE_MODEL.to_string(),
            reason: format!("{} has {} features, expected {}", what, got, N_FEATURES),
        };
        if network.input_size() != N_FEATURES {
            return Err(mismatch("network", network.input_size()));
        }
        if scaler.n_features() != N_FEATURES {
            return Err(mismatch("scaler", scaler.n_features()));
        }

        Ok(Self {
            extractor: FeatureExtractor::new(timezone),
            network,
            scaler,
            weather: WeatherSeries::empty(),
        })
    }

    /// Load network and scaler from the artifact paths in `ctx`.
    pub fn load(ctx: &ModelContext) -> Result<Self, ModelError> {
        let load_failed = |e: anyhow::Error| ModelError::LoadFailed {
            name: AUTOREGRESSIVE_MODEL.to_string(),
            reason: format!("{:#}", e),
        };
        let network = LstmNetwork::load(&ctx.artifacts.network).map_err(load_failed)?;
        let scaler = MinMaxScaler::load(&ctx.artifacts.scaler).map_err(load_failed)?;

        info!(
            network = %ctx.artifacts.network.display(),
            scaler = %ctx.artifacts.scaler.display(),
            "Loaded autoregressive model artifacts"
        );
        Self::new(Arc::new(network), Arc::new(scaler), ctx.timezone)
    }

    /// Feature rows for the last `SEQUENCE_LENGTH` positions of the buffer
    /// slice, already scaled.
    fn scaled_sequence(
        &self,
        timestamps: &[DateTime<Utc>],
        kwh: &[Option<f64>],
        event: Option<&EventOverride>,
    ) -> Result<Array2<f64>, ModelError> {
        let factor = demand_factor(event);
        let shift = temperature_shift(event);

        let energy = fill_gaps(kwh);
        let lag_day = fill_gaps(&lagged(kwh, DAILY_LAG));
        let lag_week = fill_gaps(&lagged(kwh, WEEKLY_LAG));
        let mean_short = fill_gaps(&trailing_mean(kwh, SHORT_ROLLING_WINDOW));
        let std_short = fill_gaps(&trailing_std(kwh, SHORT_ROLLING_WINDOW));
        let mean_long = fill_gaps(&trailing_mean(kwh, LONG_ROLLING_WINDOW));

        let first = timestamps.len() - SEQUENCE_LENGTH;
        let mut flat = Vec::with_capacity(SEQUENCE_LENGTH * N_FEATURES);
        for i in first..timestamps.len() {
            let ts = timestamps[i];
            let cal = self.extractor.calendar(ts);
            let point = self.weather.filled_at(ts);
            let mut weather = WeatherFeatures::from_point(point.as_ref());
            if point.is_some() {
                weather = weather.with_temperature_shift(shift);
            }

            let row = [
                energy[i] * factor,
                weather.temperature_c,
                weather.humidity_percent,
                weather.dew_point_c,
                weather.precipitation_mm,
                weather.cloud_cover_percent,
                f64::from(cal.hour),
                f64::from(cal.day_of_week),
                f64::from(cal.day_of_year),
                f64::from(cal.week_of_year),
                f64::from(cal.month),
                if cal.is_weekend { 1.0 } else { 0.0 },
                lag_day[i] * factor,
                lag_week[i] * factor,
                mean_short[i] * factor,
                std_short[i] * factor,
                mean_long[i] * factor,
            ];
            flat.extend(self.scaler.transform(&row));
        }

        Array2::from_shape_vec((SEQUENCE_LENGTH, N_FEATURES), flat)
            .map_err(|e| ModelError::Prediction(format!("invalid feature table: {}", e)))
    }
}

impl ForecastModel for AutoregressiveForecastModel {
    fn name(&self) -> &str {
        AUTOREGRESSIVE_MODEL
    }

    fn required_history_count(&self) -> usize {
        REQUIRED_HISTORY
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn attach_weather(&mut self, weather: WeatherSeries) {
        self.weather = weather;
    }

    /// Weights are fixed; nothing is fitted per run.
    fn train(&mut self, history: &[Reading], _event: Option<&EventOverride>) -> Result<(), ModelError> {
        debug!(records = history.len(), "Autoregressive model uses pre-trained weights");
        Ok(())
    }

    fn predict(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        history: &[Reading],
        step: Duration,
        event: Option<&EventOverride>,
    ) -> Result<Vec<PredictionPoint>, ModelError> {
        let mut buffer = HistoryBuffer::regularise(history, Duration::minutes(BUFFER_INTERVAL_MINUTES));
        let factor = demand_factor(event);
        let mut predictions = Vec::new();
        let mut skipped = 0usize;

        for t in step_grid(start, end, step) {
            let tail = buffer.len().saturating_sub(WEEKLY_LAG);
            let mut timestamps = buffer.timestamps[tail..].to_vec();
            let mut kwh = buffer.kwh[tail..].to_vec();
            timestamps.push(t);
            kwh.push(None);

            if kwh.len() < SEQUENCE_LENGTH {
                skipped += 1;
                continue;
            }

            let sequence = self.scaled_sequence(&timestamps, &kwh, event)?;
            let scaled = self
                .network
                .forward(&sequence)
                .map_err(|e| ModelError::Prediction(e.to_string()))?;
            let value = self.scaler.inverse(TARGET_INDEX, scaled);
            if !value.is_finite() {
                return Err(ModelError::Prediction(format!(
                    "network produced a non-finite value at {}",
                    t
                )));
            }
            let value = value.max(0.0);

            predictions.push(PredictionPoint::new(t, value));
            // The buffer holds the unreduced series; the event factor is
            // applied once when features are built.
            let unreduced = if factor > 0.0 { value / factor } else { 0.0 };
            buffer.push(t, unreduced);
        }

        if skipped > 0 {
            warn!(
                skipped,
                buffered = buffer.len(),
                needed = SEQUENCE_LENGTH,
                "Autoregressive steps skipped for lack of history"
            );
        }
        debug!(points = predictions.len(), %start, %end, "Autoregressive forecast produced");

        Ok(predictions)
    }
}

/// Working copy of the target series on a regular grid. Predictions are
/// appended as the rollout advances.
#[derive(Debug, Clone, Default)]
struct HistoryBuffer {
    timestamps: Vec<DateTime<Utc>>,
    kwh: Vec<Option<f64>>,
}

impl HistoryBuffer {
    /// Resample observations onto a grid anchored at the first one, linearly
    /// interpolating between neighbours.
    fn regularise(history: &[Reading], interval: Duration) -> Self {
        let mut observed: Vec<(DateTime<Utc>, f64)> =
            history.iter().filter_map(Reading::observation).collect();
        observed.sort_by_key(|(ts, _)| *ts);
        observed.dedup_by_key(|(ts, _)| *ts);

        let (Some(&(first, _)), Some(&(last, _))) = (observed.first(), observed.last()) else {
            return Self::default();
        };

        let mut buffer = Self::default();
        let mut j = 0;
        for t in step_grid(first, last, interval) {
            while j + 1 < observed.len() && observed[j + 1].0 <= t {
                j += 1;
            }
            let (t0, v0) = observed[j];
            let value = match observed.get(j + 1) {
                Some(&(t1, v1)) if t > t0 => {
                    let frac = (t - t0).num_seconds() as f64 / (t1 - t0).num_seconds() as f64;
                    v0 + (v1 - v0) * frac
                }
                _ => v0,
            };
            buffer.push(t, value);
        }
        buffer
    }

    fn len(&self) -> usize {
        self.kwh.len()
    }

    fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.timestamps.push(timestamp);
        self.kwh.push(Some(value));
    }
}
