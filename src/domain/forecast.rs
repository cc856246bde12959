use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One point of a model's output series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_kwh: f64,
}

impl PredictionPoint {
    pub fn new(timestamp: DateTime<Utc>, predicted_kwh: f64) -> Self {
        Self {
            timestamp,
            predicted_kwh,
        }
    }
}

/// Persisted prediction, joined with the observed value when one existed at
/// the same timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPrediction {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub predicted_kwh: f64,
    pub actual_kwh: Option<f64>,
}

/// Audit record of a single simulation run.
///
/// Registered before predictions are written so that a run which crashes
/// during inference still leaves a trace. Metrics are filled in afterwards
/// and stay `None` when nothing could be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub run_id: Uuid,
    pub meter_id: String,
    pub model_requested: String,
    pub model_used: String,
    pub fallback_reason: Option<String>,
    pub prediction_start: DateTime<Utc>,
    pub prediction_end: DateTime<Utc>,
    pub training_window_start: Option<DateTime<Utc>>,
    pub training_window_end: Option<DateTime<Utc>>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ForecastRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        meter_id: impl Into<String>,
        model_requested: impl Into<String>,
        model_used: impl Into<String>,
        fallback_reason: Option<String>,
        prediction_start: DateTime<Utc>,
        prediction_end: DateTime<Utc>,
        training_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            meter_id: meter_id.into(),
            model_requested: model_requested.into(),
            model_used: model_used.into(),
            fallback_reason,
            prediction_start,
            prediction_end,
            training_window_start: training_window.map(|(start, _)| start),
            training_window_end: training_window.map(|(_, end)| end),
            mae: None,
            rmse: None,
            created_at,
        }
    }

    pub fn has_metrics(&self) -> bool {
        self.mae.is_some() && self.rmse.is_some()
    }
}
