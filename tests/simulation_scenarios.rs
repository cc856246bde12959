//! End-to-end simulation runs against the in-memory store.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use meter_twin::domain::{step_grid, EventKind, EventOverride, PredictionPoint, Reading};
use meter_twin::forecast::{GeoLocation, WeatherPoint, WeatherProvider, WeatherSeries};
use meter_twin::ml::{ForecastModel, ModelContext, ModelError};
use meter_twin::repo::{InMemoryStore, MeterStore};
use meter_twin::twin::{
    SimulationError, SimulationOutcome, SimulationRequest, SimulationSettings, WindowMode,
    TRAINING_FAILED,
};

#[tokio::test]
async fn scenario_a_requested_model_used_with_enough_history() {
    let store = Arc::new(InMemoryStore::with_readings(history(200)));
    let registry = registry();
    register_stub(&registry, "stub", 50);

    let outcome = twin(store, registry)
        .run_simulation(SimulationRequest::new(METER, "stub"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "stub");
    assert!(outcome.fallback_reason().is_none());
    let report = outcome.as_report().unwrap();
    assert_eq!(report.training_records, 200);
    assert!(!report.predictions.is_empty());
}

#[tokio::test]
async fn scenario_b_insufficient_history_falls_back() {
    let store = Arc::new(InMemoryStore::with_readings(history(10)));
    let registry = registry();
    register_stub(&registry, "stub", 50);

    let outcome = twin(store, registry)
        .run_simulation(SimulationRequest::new(METER, "stub"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "baseline");
    let reason = outcome.fallback_reason().unwrap();
    assert!(reason.contains("Insufficient data"), "{reason}");
    assert!(reason.contains("Had 10 of 50"), "{reason}");
}

#[tokio::test]
async fn scenario_c_empty_window_is_rejected() {
    let store = Arc::new(InMemoryStore::with_readings(history(200)));
    let at = now() - Duration::hours(3);

    let result = twin(store.clone(), registry())
        .run_simulation(SimulationRequest::new(METER, "baseline").with_window(at, at))
        .await;

    assert!(matches!(result, Err(SimulationError::InvalidWindow { .. })));
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn scenario_d_no_history_aligns_to_next_quarter_hour() {
    let store = Arc::new(InMemoryStore::new());

    let outcome = twin(store.clone(), registry())
        .run_simulation(SimulationRequest::new(METER, "baseline"))
        .await
        .unwrap();

    let report = outcome.as_report().unwrap();
    let expected_start = Utc.with_ymd_and_hms(2024, 3, 15, 10, 15, 0).unwrap();
    assert_eq!(report.window_mode, WindowMode::Inferred);
    assert_eq!(report.window_start, expected_start);
    assert_eq!(report.window_end, expected_start + Duration::hours(24));
    assert!(report.predictions.is_empty());
    assert!(!report.metrics.is_available());

    let run = store.latest_run(METER).await.unwrap().unwrap();
    assert_eq!(run.run_id, report.run_id);
    assert!(run.mae.is_none());
}

#[tokio::test]
async fn scenario_e_autoregressive_with_one_point_predicts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_autoregressive_artifacts(dir.path());
    let registry = meter_twin::ml::ModelRegistry::with_defaults(context(dir.path()));

    let mut model = registry.resolve("dl_model").unwrap();
    let one = history(1);
    model.train(&one, None).unwrap();
    let predictions = model
        .predict(now(), now() + Duration::minutes(90), &one, Duration::minutes(30), None)
        .unwrap();
    assert!(predictions.is_empty());

    // Through the orchestrator the same request falls back.
    let store = Arc::new(InMemoryStore::with_readings(one));
    let outcome = twin(store, registry)
        .run_simulation(SimulationRequest::new(METER, "dl_model"))
        .await
        .unwrap();
    assert_eq!(outcome.model_used(), "baseline");
    assert!(outcome.fallback_reason().unwrap().contains("Had 1 of 384"));
}

#[tokio::test]
async fn autoregressive_without_artifacts_falls_back_with_load_reason() {
    let store = Arc::new(InMemoryStore::with_readings(history(400)));

    let outcome = twin(store, registry())
        .run_simulation(SimulationRequest::new(METER, "dl_model"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "baseline");
    let reason = outcome.fallback_reason().unwrap();
    assert!(reason.starts_with("Could not load requested model 'dl_model'"), "{reason}");
}

#[tokio::test]
async fn unknown_model_falls_back() {
    let store = Arc::new(InMemoryStore::with_readings(history(48)));

    let outcome = twin(store, registry())
        .run_simulation(SimulationRequest::new(METER, "prophet"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "baseline");
    assert!(outcome.fallback_reason().unwrap().contains("'prophet'"));
}

#[tokio::test]
async fn baseline_request_with_history_records_no_fallback() {
    let store = Arc::new(InMemoryStore::with_readings(history(3)));

    let outcome = twin(store, registry())
        .run_simulation(SimulationRequest::new(METER, "Baseline_Model"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "baseline");
    assert!(outcome.fallback_reason().is_none());
}

#[tokio::test]
async fn baseline_request_without_history_records_shortfall() {
    let store = Arc::new(InMemoryStore::new());

    let outcome = twin(store.clone(), registry())
        .run_simulation(SimulationRequest::new(METER, "baseline_model"))
        .await
        .unwrap();

    assert_eq!(outcome.model_used(), "baseline");
    let reason = outcome.fallback_reason().unwrap();
    assert!(reason.contains("Had 0 of 1 required records"), "{reason}");

    let run = store.latest_run(METER).await.unwrap().unwrap();
    assert_eq!(run.fallback_reason.as_deref(), Some(reason));
}

#[tokio::test]
async fn explicit_window_predictions_follow_step_grid() {
    let store = Arc::new(InMemoryStore::with_readings(history(200)));
    let registry = registry();
    register_stub(&registry, "stub", 50);
    let start = now() - Duration::hours(6);
    let end = now() - Duration::hours(1) - Duration::minutes(10);

    let outcome = twin(store, registry)
        .run_simulation(SimulationRequest::new(METER, "stub").with_window(start, end))
        .await
        .unwrap();

    let report = outcome.as_report().unwrap();
    assert_eq!(report.window_mode, WindowMode::Explicit);
    let timestamps: Vec<_> = report.predictions.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, step_grid(start, end, Duration::minutes(30)));
    assert!(timestamps.iter().all(|ts| *ts >= start && *ts <= end));
}

#[tokio::test]
async fn backtest_scores_and_persists_against_actuals() {
    let store = Arc::new(InMemoryStore::with_readings(history(200)));
    let registry = registry();
    register_stub(&registry, "stub", 50);
    let start = now() - Duration::hours(6);
    let end = now() - Duration::hours(1);

    let outcome = twin(store.clone(), registry)
        .run_simulation(SimulationRequest::new(METER, "stub").with_window(start, end))
        .await
        .unwrap();

    let metrics = outcome.metrics();
    assert!(metrics.is_available());
    assert_eq!(metrics.sample_count, 11);
    assert!(metrics.mae <= metrics.rmse + 1e-12);

    let run_id = outcome.run_id().unwrap();
    let run = store.latest_run(METER).await.unwrap().unwrap();
    assert_eq!(run.run_id, run_id);
    assert_eq!(run.mae, metrics.mae());
    assert_eq!(run.rmse, metrics.rmse());

    let persisted = store.run_predictions(run_id).await.unwrap();
    assert_eq!(persisted.len(), 11);
    assert!(persisted.iter().all(|p| p.actual_kwh.is_some()));
}

#[tokio::test]
async fn backtest_without_history_is_insufficient_data() {
    let store = Arc::new(InMemoryStore::new());

    let result = twin(store, registry())
        .run_simulation(
            SimulationRequest::new(METER, "baseline")
                .with_window(now() - Duration::hours(4), now()),
        )
        .await;

    assert!(matches!(result, Err(SimulationError::InsufficientData { .. })));
}

#[tokio::test]
async fn training_failure_returns_structured_outcome() {
    let store = Arc::new(InMemoryStore::with_readings(history(100)));
    let registry = registry();
    registry.register("fragile", |_: &ModelContext| {
        Ok(Box::new(StubModel::failing("fragile")) as Box<dyn ForecastModel>)
    });

    let outcome = twin(store.clone(), registry)
        .run_simulation(SimulationRequest::new(METER, "fragile"))
        .await
        .unwrap();

    match &outcome {
        SimulationOutcome::TrainingFailed(failure) => {
            assert_eq!(failure.model_used, "fragile");
            assert_eq!(failure.fallback_reason, TRAINING_FAILED);
            assert!(failure.run_id.is_none());
            assert!(failure.predictions.is_empty());
        }
        other => panic!("expected training failure, got {other:?}"),
    }
    assert!(!outcome.metrics().is_available());
    assert_eq!(store.run_count(), 0);
}

#[tokio::test]
async fn standard_forecast_starts_after_latest_reading() {
    let readings = history(48);
    let latest = readings.last().unwrap().timestamp;
    let store = Arc::new(InMemoryStore::with_readings(readings));

    let outcome = twin(store, registry())
        .run_simulation(SimulationRequest::new(METER, "baseline").with_horizon_hours(3))
        .await
        .unwrap();

    let report = outcome.as_report().unwrap();
    assert_eq!(report.window_start, latest + Duration::minutes(15));
    assert_eq!(report.window_end, report.window_start + Duration::hours(3));
}

#[tokio::test]
async fn demand_shutdown_scales_baseline_forecast() {
    let store = Arc::new(InMemoryStore::with_readings(history(96)));
    let twin = twin(store, registry());

    let normal = twin
        .run_simulation(SimulationRequest::new(METER, "baseline").with_horizon_hours(2))
        .await
        .unwrap();
    let shutdown = twin
        .run_simulation(
            SimulationRequest::new(METER, "baseline")
                .with_horizon_hours(2)
                .with_event(EventOverride::new(EventKind::DemandShutdownPercent, 50.0)),
        )
        .await
        .unwrap();

    let total = |o: &SimulationOutcome| -> f64 {
        o.as_report().unwrap().predictions.iter().map(|p| p.predicted_kwh).sum()
    };
    assert!(total(&normal) > 0.0);
    assert!((total(&shutdown) - total(&normal) / 2.0).abs() < 1e-6);
}

#[tokio::test]
async fn concurrent_runs_are_isolated() {
    let store = Arc::new(InMemoryStore::with_readings(history(120)));
    let registry = registry();
    register_stub(&registry, "stub", 50);
    let twin = twin(store.clone(), registry);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let twin = twin.clone();
        let model = if i % 2 == 0 { "stub" } else { "baseline" };
        tasks.spawn(async move {
            twin.run_simulation(SimulationRequest::new(METER, model).with_horizon_hours(2))
                .await
        });
    }

    let mut run_ids = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap().unwrap();
        run_ids.insert(outcome.run_id().unwrap());
    }
    assert_eq!(run_ids.len(), 8);
    assert_eq!(store.run_count(), 8);
}

/// Stub that burns wall-clock time in training and prediction.
struct SlowModel(StubModel);

impl ForecastModel for SlowModel {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn required_history_count(&self) -> usize {
        self.0.required_history_count()
    }

    fn is_trained(&self) -> bool {
        self.0.is_trained()
    }

    fn train(&mut self, history: &[Reading], event: Option<&EventOverride>) -> Result<(), ModelError> {
        std::thread::sleep(std::time::Duration::from_millis(150));
        self.0.train(history, event)
    }

    fn predict(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        history: &[Reading],
        step: Duration,
        event: Option<&EventOverride>,
    ) -> Result<Vec<PredictionPoint>, ModelError> {
        std::thread::sleep(std::time::Duration::from_millis(150));
        self.0.predict(start, end, history, step, event)
    }
}

#[tokio::test]
async fn model_work_leaves_the_runtime_responsive() {
    let store = Arc::new(InMemoryStore::with_readings(history(60)));
    let registry = registry();
    registry.register("slow", |_: &ModelContext| {
        Ok(Box::new(SlowModel(StubModel::new("slow", 1))) as Box<dyn ForecastModel>)
    });

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    let outcome = twin(store, registry)
        .run_simulation(SimulationRequest::new(METER, "slow").with_horizon_hours(1))
        .await
        .unwrap();
    ticker.abort();

    assert_eq!(outcome.model_used(), "slow");
    assert!(ticks.load(Ordering::Relaxed) >= 5);
}

/// Records the requested date range and returns a flat 30 °C series.
#[derive(Default)]
struct RecordingWeather {
    requests: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

#[async_trait]
impl WeatherProvider for RecordingWeather {
    async fn historical(&self, _: &GeoLocation, start: NaiveDate, end: NaiveDate) -> WeatherSeries {
        self.requests.lock().push((start, end));
        let from = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap());
        let points = (0..=(end - start).num_days() * 24 + 23)
            .map(|h| WeatherPoint {
                timestamp: from + Duration::hours(h),
                temperature_c: Some(30.0),
                humidity_percent: Some(40.0),
                dew_point_c: Some(15.0),
                precipitation_mm: Some(0.0),
                cloud_cover_percent: Some(10.0),
            })
            .collect();
        WeatherSeries::new(points)
    }
}

#[tokio::test]
async fn weather_is_fetched_once_over_history_and_window() {
    let store = Arc::new(InMemoryStore::with_readings(history(96)));
    let weather = Arc::new(RecordingWeather::default());
    let settings = SimulationSettings {
        location: Some(GeoLocation {
            latitude: 26.9124,
            longitude: 75.7873,
            name: Some("Jaipur".to_string()),
        }),
        ..SimulationSettings::default()
    };
    let twin = meter_twin::twin::DigitalTwin::new(store, Arc::new(registry()), settings)
        .with_clock(Arc::new(meter_twin::domain::FixedClock::new(now())))
        .with_weather(weather.clone());

    let outcome = twin
        .run_simulation(SimulationRequest::new(METER, "baseline").with_horizon_hours(24))
        .await
        .unwrap();
    assert!(!outcome.as_report().unwrap().predictions.is_empty());

    let requests = weather.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    let (start, end) = requests[0];
    assert_eq!(start, (now() - Duration::hours(48)).date_naive());
    assert_eq!(end, (now() + Duration::hours(24)).date_naive());
}

#[tokio::test]
async fn readings_outside_training_span_are_ignored() {
    let mut readings = history(48);
    readings.push(Reading::new(METER, now() - Duration::days(30), 99.0));
    readings.push(Reading::new("other-meter", now() - Duration::hours(1), 99.0));
    let store = Arc::new(InMemoryStore::with_readings(readings));

    let outcome = twin(store, registry())
        .run_simulation(SimulationRequest::new(METER, "baseline").with_training_hours(24))
        .await
        .unwrap();

    let report = outcome.as_report().unwrap();
    assert_eq!(report.training_records, 48);
}
