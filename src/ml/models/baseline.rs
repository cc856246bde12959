//! Baseline forecaster
//!
//! A random forest regressor over calendar attributes of the timestamp plus
//! the weather at that instant. It has no dependence on recent values, so it
//! can forecast any window once trained, and it works from a single reading.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::domain::{demand_factor, step_grid, temperature_shift, EventOverride, PredictionPoint, Reading};
use crate::forecast::{FeatureExtractor, WeatherFeatures, WeatherSeries};
use crate::ml::registry::BASELINE_MODEL;
use crate::ml::smartcore::SmartcoreRandomForest;
use crate::ml::{ForecastModel, ForestParams, ModelError};

pub const BASELINE_FEATURES: [&str; 13] = [
    "hour",
    "day_of_week",
    "quarter",
    "month",
    "year",
    "day_of_year",
    "day_of_month",
    "week_of_year",
    "temperature_c",
    "humidity_percent",
    "dew_point_c",
    "precipitation_mm",
    "cloud_cover_percent",
];

#[derive(Debug)]
pub struct BaselineForecastModel {
    extractor: FeatureExtractor,
    params: ForestParams,
    weather: WeatherSeries,
    forest: Option<SmartcoreRandomForest>,
}

impl BaselineForecastModel {
    pub fn new(timezone: Tz, params: ForestParams) -> Self {
        Self {
            extractor: FeatureExtractor::new(timezone),
            params,
            weather: WeatherSeries::empty(),
            forest: None,
        }
    }

    fn feature_row(&self, timestamp: DateTime<Utc>, temp_shift: f64) -> Vec<f64> {
        let cal = self.extractor.calendar(timestamp);
        let point = self.weather.filled_at(timestamp);
        let mut weather = WeatherFeatures::from_point(point.as_ref());
        if point.is_some() {
            weather = weather.with_temperature_shift(temp_shift);
        }

        vec![
            f64::from(cal.hour),
            f64::from(cal.day_of_week),
            f64::from(cal.quarter),
            f64::from(cal.month),
            f64::from(cal.year),
            f64::from(cal.day_of_year),
            f64::from(cal.day_of_month),
            f64::from(cal.week_of_year),
            weather.temperature_c,
            weather.humidity_percent,
            weather.dew_point_c,
            weather.precipitation_mm,
            weather.cloud_cover_percent,
        ]
    }
}

impl ForecastModel for BaselineForecastModel {
    fn name(&self) -> &str {
        BASELINE_MODEL
    }

    fn is_trained(&self) -> bool {
        self.forest.is_some()
    }

    fn attach_weather(&mut self, weather: WeatherSeries) {
        self.weather = weather;
    }

    fn train(
        &mut self,
        history: &[Reading],
        event: Option<&EventOverride>,
    ) -> Result<(), ModelError> {
        self.forest = None;

        // Demand events shrink the target itself so the forest learns the
        // reduced profile.
        let factor = demand_factor(event);
        let (x, y): (Vec<Vec<f64>>, Vec<f64>) = history
            .iter()
            .filter_map(Reading::observation)
            .map(|(ts, value)| (self.feature_row(ts, 0.0), value * factor))
            .unzip();

        if x.is_empty() {
            warn!(
                records = history.len(),
                "No usable training targets, baseline stays untrained"
            );
            return Ok(());
        }

        let forest = SmartcoreRandomForest::train(&x, &y, &self.params)?;
        info!(
            samples = forest.training_samples(),
            features = BASELINE_FEATURES.len(),
            weather_points = self.weather.len(),
            "Baseline model trained"
        );
        self.forest = Some(forest);
        Ok(())
    }

    fn predict(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _history: &[Reading],
        step: Duration,
        event: Option<&EventOverride>,
    ) -> Result<Vec<PredictionPoint>, ModelError> {
        let Some(forest) = &self.forest else {
            warn!("Baseline model is not trained, returning empty forecast");
            return Ok(Vec::new());
        };

        let grid = step_grid(start, end, step);
        let shift = temperature_shift(event);
        let rows: Vec<Vec<f64>> = grid.iter().map(|ts| self.feature_row(*ts, shift)).collect();
        let values = forest.predict(&rows)?;

        debug!(points = values.len(), %start, %end, "Baseline forecast produced");

        Ok(grid
            .into_iter()
            .zip(values)
            .map(|(ts, v)| PredictionPoint::new(ts, v))
            .collect())
    }
}
