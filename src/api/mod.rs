pub mod error;
pub mod health;
pub mod meters;
pub mod response;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::forecast::OpenMeteoClient;
use crate::ml::ModelRegistry;
use crate::repo;
use crate::twin::{DigitalTwin, SimulationSettings};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub twin: Arc<DigitalTwin>,
}

impl AppState {
    /// Wire store, model registry and weather provider from configuration.
    pub async fn new(cfg: &Config) -> anyhow::Result<Self> {
        let store = repo::connect(cfg).await?;
        let registry = Arc::new(ModelRegistry::with_defaults(cfg.model_context()?));
        let settings = SimulationSettings::from_config(cfg)?;
        let sampling_interval = settings.sampling_interval;

        let mut twin = DigitalTwin::new(store, registry, settings);
        if cfg.weather.enabled && cfg.location.is_some() {
            twin = twin.with_weather(Arc::new(OpenMeteoClient::new(
                cfg.weather.base_url.clone(),
                Duration::from_secs(cfg.weather.http_timeout_seconds),
                sampling_interval,
            )));
        } else {
            tracing::info!("Weather provider disabled; models train on calendar features only");
        }

        Ok(Self::from_twin(twin))
    }

    pub fn from_twin(twin: DigitalTwin) -> Self {
        Self {
            twin: Arc::new(twin),
        }
    }
}

fn v1(state: AppState) -> Router {
    Router::new()
        .route("/meters/:meter_id/simulate", post(meters::simulate))
        .route("/meters/:meter_id/latest_forecast", get(meters::latest_forecast))
        .route("/meters", get(meters::list_meters))
        .route(
            "/meters/:meter_id/readings",
            get(meters::reading_history).post(meters::ingest_readings),
        )
        .route("/meters/:meter_id/readings/latest", get(meters::latest_readings))
        .route("/models", get(meters::list_models))
        .with_state(state)
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .with_state(state.clone())
        .nest("/api/v1", v1(state))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    cfg.server.request_timeout_seconds,
                ))),
        )
        .layer(TraceLayer::new_for_http())
}
