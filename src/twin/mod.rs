//! Digital twin orchestration.
//!
//! [`DigitalTwin::run_simulation`] drives one forecast run end to end:
//! fetch history, pick a model (falling back to the baseline when the
//! requested one cannot be used), train, resolve the prediction window,
//! register the run, predict, score against actuals and persist. Every run
//! works on its own model instance, so concurrent runs never share state.

pub mod outcome;
pub mod window;

pub use outcome::*;
pub use window::*;

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::domain::{
    next_aligned_boundary, Clock, EventOverride, ForecastPrediction, ForecastRun,
    HistoricalWindow, PredictionPoint, Reading, SystemClock,
};
use crate::forecast::{ForecastMetrics, GeoLocation, NoWeather, WeatherProvider};
use crate::ml::{ForecastModel, ModelRegistry, AUTOREGRESSIVE_MODEL, BASELINE_MODEL};
use crate::repo::MeterStore;

/// Orchestrator policy knobs.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub timezone: Tz,
    pub sampling_interval: Duration,
    pub step_interval: Duration,
    pub default_training_hours: u32,
    pub default_horizon_hours: u32,
    pub max_horizon_hours: u32,
    pub min_training_hours_autoregressive: u32,
    pub location: Option<GeoLocation>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            sampling_interval: Duration::minutes(15),
            step_interval: Duration::minutes(30),
            default_training_hours: 336,
            default_horizon_hours: 24,
            max_horizon_hours: 168,
            min_training_hours_autoregressive: 168,
            location: None,
        }
    }
}

impl SimulationSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let sim = &cfg.simulation;
        Ok(Self {
            timezone: sim.tz()?,
            sampling_interval: Duration::minutes(i64::from(sim.sampling_interval_minutes)),
            step_interval: Duration::minutes(i64::from(sim.step_interval_minutes)),
            default_training_hours: sim.default_training_hours,
            default_horizon_hours: sim.default_horizon_hours,
            max_horizon_hours: sim.max_horizon_hours,
            min_training_hours_autoregressive: sim.min_training_hours_autoregressive,
            location: cfg.location.as_ref().map(GeoLocation::from),
        })
    }

    fn sampling_minutes(&self) -> u32 {
        u32::try_from(self.sampling_interval.num_minutes()).unwrap_or(15)
    }
}

/// One simulation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub meter_id: String,
    pub model_name: String,
    /// Lookback in hours; the configured default when absent.
    pub training_hours: Option<u32>,
    /// Forecast horizon in hours for inferred windows; clamped to the
    /// configured maximum.
    pub horizon_hours: Option<u32>,
    /// Explicit `[start, end]` for backtests.
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub event: Option<EventOverride>,
}

impl SimulationRequest {
    pub fn new(meter_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            meter_id: meter_id.into(),
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_training_hours(mut self, hours: u32) -> Self {
        self.training_hours = Some(hours);
        self
    }

    pub fn with_horizon_hours(mut self, hours: u32) -> Self {
        self.horizon_hours = Some(hours);
        self
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some((start, end));
        self
    }

    pub fn with_event(mut self, event: EventOverride) -> Self {
        self.event = Some(event);
        self
    }
}

#[derive(Clone)]
pub struct DigitalTwin {
    store: Arc<dyn MeterStore>,
    registry: Arc<ModelRegistry>,
    weather: Arc<dyn WeatherProvider>,
    clock: Arc<dyn Clock>,
    settings: SimulationSettings,
}

impl DigitalTwin {
    pub fn new(
        store: Arc<dyn MeterStore>,
        registry: Arc<ModelRegistry>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            store,
            registry,
            weather: Arc::new(NoWeather),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherProvider>) -> Self {
        self.weather = weather;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MeterStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Current instant from the twin's clock, truncated to the minute.
    pub fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
    }

    /// Run one simulation.
    ///
    /// Errors only for conditions that make the run meaningless: an explicit
    /// window that is empty, a backtest with no history, a missing baseline,
    /// or a run record that could not be registered. A model that fails to
    /// train yields [`SimulationOutcome::TrainingFailed`] with nothing
    /// persisted. Failures after registration are logged and the run still
    /// completes.
    #[instrument(
        skip(self, request),
        fields(meter_id = %request.meter_id, model = %request.model_name)
    )]
    pub async fn run_simulation(
        &self,
        request: SimulationRequest,
    ) -> Result<SimulationOutcome, SimulationError> {
        let explicit = request
            .window
            .map(|(start, end)| PredictionWindow::explicit(start, end))
            .transpose()?;

        let now = self.now();
        let training_hours = self.training_hours(&request);
        let horizon_hours = self.horizon_hours(&request);

        let history = self
            .fetch_history(&request.meter_id, training_hours, now)
            .await;
        info!(
            records = history.len(),
            training_hours,
            horizon_hours,
            backtest = explicit.is_some(),
            "Fetched training history"
        );

        if history.is_empty() && explicit.is_some() {
            return Err(SimulationError::InsufficientData {
                meter_id: request.meter_id.clone(),
                training_hours,
            });
        }

        let (mut model, fallback) = self.select_model(&request.model_name, history.len())?;
        let model_used = model.name().to_string();
        let fallback_reason = fallback.map(|f| f.to_string());

        self.attach_weather(model.as_mut(), &history, explicit.as_ref(), horizon_hours, now)
            .await;

        let event = request.event;
        let readings: Arc<[Reading]> = history.readings().into();

        let trained = {
            let readings = Arc::clone(&readings);
            tokio::task::spawn_blocking(move || {
                let result = model.train(&readings, event.as_ref());
                result.map(|()| model).map_err(|e| e.to_string())
            })
            .await
            .unwrap_or_else(|e| Err(format!("training task aborted: {e}")))
        };
        let model = match trained {
            Ok(model) => model,
            Err(e) => {
                error!(model = %model_used, error = %e, "Model training failed");
                return Ok(SimulationOutcome::TrainingFailed(TrainingFailure {
                    run_id: None,
                    meter_id: request.meter_id.clone(),
                    model_requested: request.model_name.clone(),
                    model_used,
                    fallback_reason: TRAINING_FAILED.to_string(),
                    error: e,
                    predictions: Vec::new(),
                    metrics: ForecastMetrics::unavailable(),
                }));
            }
        };

        let window = match explicit {
            Some(window) => window,
            None => self.infer_window(&request.meter_id, &history, horizon_hours, now).await,
        };

        let training_window = history.first_timestamp().zip(history.last_timestamp());
        let mut run = ForecastRun::new(
            request.meter_id.clone(),
            request.model_name.clone(),
            model_used.clone(),
            fallback_reason.clone(),
            window.start,
            window.end,
            training_window,
            now,
        );
        self.store.upsert_run(&run).await?;

        let step = self.settings.step_interval;
        let (start, end) = (window.start, window.end);
        let predicted = tokio::task::spawn_blocking(move || {
            model
                .predict(start, end, &readings, step, event.as_ref())
                .map_err(|e| e.to_string())
        })
        .await
        .unwrap_or_else(|e| Err(format!("prediction task aborted: {e}")));
        let predictions = match predicted {
            Ok(predictions) => predictions,
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "Prediction failed, recording empty forecast");
                Vec::new()
            }
        };

        let actuals = match self
            .store
            .readings_in_range(&request.meter_id, window.start, window.end)
            .await
        {
            Ok(actuals) => actuals,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Could not fetch actuals for evaluation");
                Vec::new()
            }
        };

        let metrics = ForecastMetrics::evaluate(
            actuals.iter().filter_map(Reading::observation),
            predictions.iter().map(|p| (p.timestamp, p.predicted_kwh)),
        );

        self.persist(&run, &predictions, &actuals, &metrics).await;
        run.mae = metrics.mae();
        run.rmse = metrics.rmse();

        info!(
            run_id = %run.run_id,
            model_used = %run.model_used,
            fallback = run.fallback_reason.is_some(),
            predictions = predictions.len(),
            actuals = actuals.len(),
            %metrics,
            "Simulation completed"
        );

        Ok(SimulationOutcome::Completed(SimulationReport {
            run_id: run.run_id,
            meter_id: run.meter_id,
            model_requested: run.model_requested,
            model_used: run.model_used,
            fallback_reason: run.fallback_reason,
            window_mode: window.mode,
            window_start: window.start,
            window_end: window.end,
            training_window_start: run.training_window_start,
            training_window_end: run.training_window_end,
            training_records: history.len(),
            predictions,
            actuals,
            metrics,
        }))
    }

    fn training_hours(&self, request: &SimulationRequest) -> u32 {
        let hours = request
            .training_hours
            .unwrap_or(self.settings.default_training_hours)
            .max(1);
        if self.registry.resolved_name(&request.model_name) == AUTOREGRESSIVE_MODEL {
            hours.max(self.settings.min_training_hours_autoregressive)
        } else {
            hours
        }
    }

    fn horizon_hours(&self, request: &SimulationRequest) -> u32 {
        request
            .horizon_hours
            .unwrap_or(self.settings.default_horizon_hours)
            .clamp(1, self.settings.max_horizon_hours.max(1))
    }

    async fn fetch_history(
        &self,
        meter_id: &str,
        training_hours: u32,
        now: DateTime<Utc>,
    ) -> HistoricalWindow {
        let start = now - Duration::hours(i64::from(training_hours));
        let readings = match self.store.readings_in_range(meter_id, start, now).await {
            Ok(readings) => readings,
            Err(e) => {
                warn!(error = %e, "History unavailable, continuing with none");
                Vec::new()
            }
        };
        HistoricalWindow::new(start, now, readings)
    }

    /// Requested model if it loads and has enough history, otherwise the
    /// baseline with the reason recorded. The history check applies to a
    /// baseline request too; there the baseline itself is kept.
    fn select_model(
        &self,
        requested: &str,
        available: usize,
    ) -> Result<(Box<dyn ForecastModel>, Option<FallbackReason>), SimulationError> {
        let is_baseline = self.registry.resolved_name(requested) == BASELINE_MODEL;

        let reason = match self.registry.resolve(requested) {
            Ok(model) => {
                let required = model.required_history_count();
                if available >= required {
                    return Ok((model, None));
                }
                let reason = FallbackReason::InsufficientHistory {
                    model: requested.to_string(),
                    had: available,
                    required,
                };
                if is_baseline {
                    warn!(requested, %reason, "Baseline requested with too little history");
                    return Ok((model, Some(reason)));
                }
                reason
            }
            Err(e) if is_baseline => return Err(SimulationError::BaselineUnavailable(e)),
            Err(e) => FallbackReason::LoadFailed {
                model: requested.to_string(),
                reason: e.to_string(),
            },
        };

        warn!(requested, %reason, "Falling back to baseline model");
        self.baseline(Some(reason))
    }

    fn baseline(
        &self,
        reason: Option<FallbackReason>,
    ) -> Result<(Box<dyn ForecastModel>, Option<FallbackReason>), SimulationError> {
        let model = self
            .registry
            .resolve(BASELINE_MODEL)
            .map_err(SimulationError::BaselineUnavailable)?;
        Ok((model, reason))
    }

    /// Fetch weather spanning history and the prediction window. Runs
    /// without a configured location get none.
    async fn attach_weather(
        &self,
        model: &mut dyn ForecastModel,
        history: &HistoricalWindow,
        explicit: Option<&PredictionWindow>,
        horizon_hours: u32,
        now: DateTime<Utc>,
    ) {
        let Some(location) = &self.settings.location else {
            return;
        };

        let from = history.first_timestamp().unwrap_or_else(|| history.start());
        let until = explicit
            .map(|w| w.end)
            .unwrap_or_else(|| now + Duration::hours(i64::from(horizon_hours)));

        let weather = self
            .weather
            .historical(location, from.date_naive(), until.max(from).date_naive())
            .await;
        if weather.is_empty() {
            warn!("No weather available, models use zero-valued weather features");
            return;
        }
        if let Some(covered) = weather.points().last().map(|p| p.timestamp) {
            if covered < until {
                debug!(%covered, %until, "Weather ends before the window, later instants reuse the latest covered day");
            }
        }
        model.attach_weather(weather);
    }

    /// Start one sampling interval after the newest known reading, or at the
    /// next aligned boundary when the meter has none.
    async fn infer_window(
        &self,
        meter_id: &str,
        history: &HistoricalWindow,
        horizon_hours: u32,
        now: DateTime<Utc>,
    ) -> PredictionWindow {
        let sampling = self.settings.sampling_interval;

        let latest = match history.last_timestamp() {
            Some(ts) => Some(ts),
            None => match self.store.latest_readings(meter_id, 1).await {
                Ok(readings) => readings.first().map(|r| r.timestamp),
                Err(e) => {
                    warn!(error = %e, "Could not look up latest reading");
                    None
                }
            },
        };

        let start = match latest {
            Some(ts) => ts + sampling,
            None => next_aligned_boundary(now, &self.settings.timezone, self.settings.sampling_minutes()),
        };

        PredictionWindow::inferred(start, Duration::hours(i64::from(horizon_hours)), sampling)
    }

    async fn persist(
        &self,
        run: &ForecastRun,
        predictions: &[PredictionPoint],
        actuals: &[Reading],
        metrics: &ForecastMetrics,
    ) {
        let observed: HashMap<DateTime<Utc>, f64> =
            actuals.iter().filter_map(Reading::observation).collect();
        let rows: Vec<ForecastPrediction> = predictions
            .iter()
            .map(|p| ForecastPrediction {
                run_id: run.run_id,
                timestamp: p.timestamp,
                predicted_kwh: p.predicted_kwh,
                actual_kwh: observed.get(&p.timestamp).copied(),
            })
            .collect();

        if let Err(e) = self.store.insert_predictions(&rows).await {
            error!(run_id = %run.run_id, error = %e, "Failed to persist predictions");
        }

        if let (Some(mae), Some(rmse)) = (metrics.mae(), metrics.rmse()) {
            if let Err(e) = self.store.update_run_metrics(run.run_id, mae, rmse).await {
                error!(run_id = %run.run_id, error = %e, "Failed to persist run metrics");
            }
        }
    }
}
