use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{PredictionPoint, Reading};
use crate::forecast::ForecastMetrics;
use crate::ml::ModelError;
use crate::repo::StoreError;

/// Failures that abort a simulation run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("No historical readings for meter '{meter_id}' in the last {training_hours} hours")]
    InsufficientData {
        meter_id: String,
        training_hours: u32,
    },

    #[error("Invalid prediction window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Baseline model unavailable: {0}")]
    BaselineUnavailable(#[source] ModelError),

    #[error("Failed to register forecast run: {0}")]
    Store(#[from] StoreError),
}

/// Why the requested model was replaced by the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    LoadFailed {
        model: String,
        reason: String,
    },
    InsufficientHistory {
        model: String,
        had: usize,
        required: usize,
    },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailed { model, reason } => write!(
                f,
                "Could not load requested model '{}' ({}). Used baseline instead.",
                model, reason
            ),
            Self::InsufficientHistory {
                model,
                had,
                required,
            } => write!(
                f,
                "Insufficient data for '{}'. Had {} of {} required records. Used baseline instead.",
                model, had, required
            ),
        }
    }
}

/// How the prediction window was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Caller supplied start and end (backtest).
    Explicit,
    /// Derived from the latest data and the horizon.
    Inferred,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub meter_id: String,
    pub model_requested: String,
    pub model_used: String,
    pub fallback_reason: Option<String>,
    pub window_mode: WindowMode,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub training_window_start: Option<DateTime<Utc>>,
    pub training_window_end: Option<DateTime<Utc>>,
    pub training_records: usize,
    pub predictions: Vec<PredictionPoint>,
    pub actuals: Vec<Reading>,
    pub metrics: ForecastMetrics,
}

/// Result of a run whose model failed to train. Nothing is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingFailure {
    pub run_id: Option<Uuid>,
    pub meter_id: String,
    pub model_requested: String,
    pub model_used: String,
    pub fallback_reason: String,
    pub error: String,
    pub predictions: Vec<PredictionPoint>,
    pub metrics: ForecastMetrics,
}

pub const TRAINING_FAILED: &str = "training failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SimulationOutcome {
    Completed(SimulationReport),
    TrainingFailed(TrainingFailure),
}

impl SimulationOutcome {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Completed(report) => Some(report.run_id),
            Self::TrainingFailed(failure) => failure.run_id,
        }
    }

    pub fn model_used(&self) -> &str {
        match self {
            Self::Completed(report) => &report.model_used,
            Self::TrainingFailed(failure) => &failure.model_used,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Completed(report) => report.fallback_reason.as_deref(),
            Self::TrainingFailed(failure) => Some(&failure.fallback_reason),
        }
    }

    pub fn metrics(&self) -> &ForecastMetrics {
        match self {
            Self::Completed(report) => &report.metrics,
            Self::TrainingFailed(failure) => &failure.metrics,
        }
    }

    pub fn as_report(&self) -> Option<&SimulationReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::TrainingFailed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_messages() {
        let insufficient = FallbackReason::InsufficientHistory {
            model: "dl_model".into(),
            had: 10,
            required: 384,
        };
        assert_eq!(
            insufficient.to_string(),
            "Insufficient data for 'dl_model'. Had 10 of 384 required records. Used baseline instead."
        );

        let load = FallbackReason::LoadFailed {
            model: "prophet".into(),
            reason: "not registered".into(),
        };
        assert!(load.to_string().starts_with("Could not load requested model 'prophet'"));
    }

    #[test]
    fn test_training_failure_serializes_with_status() {
        let outcome = SimulationOutcome::TrainingFailed(TrainingFailure {
            run_id: None,
            meter_id: "m1".into(),
            model_requested: "baseline".into(),
            model_used: "baseline".into(),
            fallback_reason: TRAINING_FAILED.into(),
            error: "boom".into(),
            predictions: Vec::new(),
            metrics: ForecastMetrics::unavailable(),
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "training_failed");
        assert!(json["run_id"].is_null());
        assert!(json["metrics"]["mae"].is_null());
        assert_eq!(outcome.fallback_reason(), Some(TRAINING_FAILED));
    }
}
