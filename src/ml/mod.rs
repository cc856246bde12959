//! Forecast models and the contract the orchestrator drives them through.
//!
//! A model is constructed fresh for every simulation run by the
//! [`ModelRegistry`], optionally handed a weather series, trained on the run's
//! history and then asked for a series over the prediction window.

pub mod models;
pub mod network;
pub mod registry;
pub mod scaler;
pub mod smartcore;

pub use models::*;
pub use network::*;
pub use registry::*;
pub use scaler::*;

use crate::domain::{EventOverride, PredictionPoint, Reading};
use crate::forecast::WeatherSeries;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Forecast model '{name}' is not registered")]
    NotFound { name: String },

    #[error("Forecast model '{name}' could not be loaded: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),
}

/// Contract every forecasting model satisfies.
pub trait ForecastModel: Send + Sync {
    /// Canonical registry name, recorded as the model used for a run.
    fn name(&self) -> &str;

    /// Minimum number of historical records needed for a meaningful forecast.
    fn required_history_count(&self) -> usize {
        1
    }

    /// Whether `predict` will produce output.
    fn is_trained(&self) -> bool;

    /// Weather covering the history and the prediction window. Models that
    /// use no weather ignore it.
    fn attach_weather(&mut self, _weather: WeatherSeries) {}

    /// Fit on `history`. Empty history leaves the model untrained without
    /// failing.
    fn train(&mut self, history: &[Reading], event: Option<&EventOverride>)
        -> Result<(), ModelError>;

    /// Series over `[start, end]` at `step`. Empty when untrained.
    fn predict(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        history: &[Reading],
        step: Duration,
        event: Option<&EventOverride>,
    ) -> Result<Vec<PredictionPoint>, ModelError>;
}

/// Hyper-parameters for the random forest used by the baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// Locations of the pre-trained autoregressive artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub network: PathBuf,
    pub scaler: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl Into<PathBuf>, network_file: &str, scaler_file: &str) -> Self {
        let dir = dir.into();
        Self {
            network: dir.join(network_file),
            scaler: dir.join(scaler_file),
        }
    }
}

/// Everything a model factory may need to construct a model.
#[derive(Debug, Clone)]
pub struct ModelContext {
    pub timezone: Tz,
    pub forest: ForestParams,
    pub artifacts: ArtifactPaths,
}

impl ModelContext {
    pub fn new(timezone: Tz, artifacts: ArtifactPaths) -> Self {
        Self {
            timezone,
            forest: ForestParams::default(),
            artifacts,
        }
    }

    pub fn with_forest(mut self, forest: ForestParams) -> Self {
        self.forest = forest;
        self
    }
}
