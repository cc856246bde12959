//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

use meter_twin::domain::{step_grid, EventOverride, FixedClock, PredictionPoint, Reading};
use meter_twin::ml::{
    ArtifactPaths, ForecastModel, ModelContext, ModelError, ModelRegistry, NetworkArtifact,
    MinMaxScaler, AUTOREGRESSIVE_FEATURES,
};
use meter_twin::repo::InMemoryStore;
use meter_twin::twin::{DigitalTwin, SimulationSettings};

pub const METER: &str = "meter-001";

/// 2024-03-15 10:07:00 UTC, seven minutes past a quarter hour.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 7, 0).unwrap()
}

/// `count` half-hourly readings ending 30 minutes before `end`, oldest first,
/// following a daily sine profile.
pub fn history_before(end: DateTime<Utc>, count: i64) -> Vec<Reading> {
    (1..=count)
        .rev()
        .map(|i| {
            let ts = end - Duration::minutes(30 * i);
            Reading::new(METER, ts, profile(ts))
        })
        .collect()
}

pub fn history(count: i64) -> Vec<Reading> {
    history_before(now(), count)
}

pub fn profile(ts: DateTime<Utc>) -> f64 {
    use chrono::Timelike;
    let hour = ts.hour() as f64 + ts.minute() as f64 / 60.0;
    1.5 + (hour / 24.0 * std::f64::consts::TAU).sin()
}

/// Model that predicts the mean of its training targets.
pub struct StubModel {
    name: String,
    required: usize,
    fail_training: bool,
    level: Option<f64>,
}

impl StubModel {
    pub fn new(name: &str, required: usize) -> Self {
        Self {
            name: name.to_string(),
            required,
            fail_training: false,
            level: None,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail_training: true,
            ..Self::new(name, 1)
        }
    }
}

impl ForecastModel for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_history_count(&self) -> usize {
        self.required
    }

    fn is_trained(&self) -> bool {
        self.level.is_some()
    }

    fn train(&mut self, history: &[Reading], _event: Option<&EventOverride>) -> Result<(), ModelError> {
        if self.fail_training {
            return Err(ModelError::Training("singular matrix".to_string()));
        }
        let values: Vec<f64> = history.iter().filter_map(|r| r.energy_kwh_import).collect();
        if !values.is_empty() {
            self.level = Some(values.iter().sum::<f64>() / values.len() as f64);
        }
        Ok(())
    }

    fn predict(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _history: &[Reading],
        step: Duration,
        _event: Option<&EventOverride>,
    ) -> Result<Vec<PredictionPoint>, ModelError> {
        let Some(level) = self.level else {
            return Ok(Vec::new());
        };
        Ok(step_grid(start, end, step)
            .into_iter()
            .map(|ts| PredictionPoint::new(ts, level))
            .collect())
    }
}

pub fn context(artifacts_dir: &Path) -> ModelContext {
    ModelContext::new(
        chrono_tz::UTC,
        ArtifactPaths::in_dir(artifacts_dir, "network.json", "scaler.json"),
    )
}

/// Default registry whose autoregressive artifacts do not exist.
pub fn registry() -> ModelRegistry {
    ModelRegistry::with_defaults(context(Path::new("/nonexistent/models")))
}

pub fn register_stub(registry: &ModelRegistry, name: &str, required: usize) {
    let owned = name.to_string();
    registry.register(name, move |_: &ModelContext| {
        Ok(Box::new(StubModel::new(&owned, required)) as Box<dyn ForecastModel>)
    });
}

/// Writes a small valid network and scaler for the autoregressive model.
pub fn write_autoregressive_artifacts(dir: &Path) {
    let n = AUTOREGRESSIVE_FEATURES.len();
    let mut w_input = vec![vec![0.0; n]; 4];
    w_input[2][0] = 1.0;
    let network = NetworkArtifact {
        input_size: n,
        hidden_size: 1,
        w_input,
        w_recurrent: vec![vec![0.0]; 4],
        bias: vec![20.0, -20.0, 0.0, 20.0],
        w_dense: vec![1.0],
        b_dense: 0.0,
    };
    let mut max = vec![60.0; n];
    max[0] = 10.0;
    let scaler = MinMaxScaler::new(vec![0.0; n], max).unwrap();

    std::fs::write(dir.join("network.json"), serde_json::to_string(&network).unwrap()).unwrap();
    std::fs::write(dir.join("scaler.json"), serde_json::to_string(&scaler).unwrap()).unwrap();
}

pub fn twin(store: Arc<InMemoryStore>, registry: ModelRegistry) -> DigitalTwin {
    DigitalTwin::new(store, Arc::new(registry), SimulationSettings::default())
        .with_clock(Arc::new(FixedClock::new(now())))
}
