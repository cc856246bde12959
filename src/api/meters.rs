use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use validator::Validate;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::domain::{
    AuxiliaryChannels, EventOverride, ForecastPrediction, ForecastRun, MeterSummary, Reading,
};
use crate::twin::{SimulationOutcome, SimulationRequest, TRAINING_FAILED};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

fn default_model_name() -> String {
    "baseline_model".to_string()
}

/// Body of `POST /meters/:meter_id/simulate`.
///
/// Timestamps without an offset are read as local time in the configured
/// timezone.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SimulateBody {
    #[serde(default = "default_model_name")]
    #[validate(length(min = 1, max = 64))]
    pub model_name: String,
    #[validate(range(min = 1, max = 8760))]
    pub training_hours: Option<u32>,
    #[validate(range(min = 1, max = 8760))]
    pub duration_hours: Option<u32>,
    pub explicit_prediction_start_time: Option<String>,
    pub explicit_prediction_end_time: Option<String>,
    pub event: Option<EventOverride>,
}

impl SimulateBody {
    pub fn into_request(self, meter_id: String, tz: Tz) -> Result<SimulationRequest, ApiError> {
        let mut request = SimulationRequest::new(meter_id, self.model_name);
        request.training_hours = self.training_hours;
        request.horizon_hours = self.duration_hours;
        request.event = self.event;

        match (
            self.explicit_prediction_start_time,
            self.explicit_prediction_end_time,
        ) {
            (Some(start), Some(end)) => {
                request.window = Some((parse_timestamp(&start, tz)?, parse_timestamp(&end, tz)?));
            }
            (None, None) => {}
            _ => {
                return Err(ApiError::BadRequest(
                    "explicit_prediction_start_time and explicit_prediction_end_time must be given together"
                        .to_string(),
                ))
            }
        }

        Ok(request)
    }
}

/// RFC 3339 timestamps keep their offset; naive ones are localised to `tz`,
/// taking the earlier instant on an ambiguous wall-clock time.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Unparseable timestamp '{raw}'")))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| ApiError::BadRequest(format!("'{raw}' does not exist in {tz}")))
}

/// POST /api/v1/meters/:meter_id/simulate
///
/// A run whose model failed to train is answered with a 500 that still
/// carries the structured outcome.
pub async fn simulate(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
    Json(body): Json<SimulateBody>,
) -> Result<Response, ApiError> {
    body.validate()?;
    let started = Instant::now();

    let request = body.into_request(meter_id, state.twin.settings().timezone)?;
    let outcome = state.twin.run_simulation(request).await?;
    let elapsed = started.elapsed().as_millis() as u64;

    let failure = match &outcome {
        SimulationOutcome::TrainingFailed(f) => Some(format!("{TRAINING_FAILED}: {}", f.error)),
        SimulationOutcome::Completed(_) => None,
    };

    let response = match failure {
        Some(message) => ApiResponse::failure(outcome, message),
        None => ApiResponse::success(outcome),
    };
    Ok(response.with_duration(elapsed).into_response())
}

#[derive(Debug, Serialize)]
pub struct LatestForecast {
    pub run: ForecastRun,
    pub predictions: Vec<ForecastPrediction>,
}

/// GET /api/v1/meters/:meter_id/latest_forecast
pub async fn latest_forecast(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
) -> Result<ApiResponse<LatestForecast>, ApiError> {
    let store = state.twin.store();
    let run = store
        .latest_run(&meter_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No forecast for meter '{meter_id}'")))?;
    let predictions = store.run_predictions(run.run_id).await?;

    let count = predictions.len();
    Ok(ApiResponse::success(LatestForecast { run, predictions }).with_count(count))
}

/// One reading as posted by the ingestion side.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadingBody {
    pub timestamp: String,
    pub energy_kwh_import: Option<f64>,
    #[serde(default, flatten)]
    pub channels: AuxiliaryChannels,
}

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub received: usize,
    pub inserted: usize,
}

/// POST /api/v1/meters/:meter_id/readings
///
/// Duplicate timestamps are ignored, so re-posting a batch is harmless.
pub async fn ingest_readings(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
    Json(body): Json<Vec<ReadingBody>>,
) -> Result<ApiResponse<IngestSummary>, ApiError> {
    let tz = state.twin.settings().timezone;
    let readings = body
        .into_iter()
        .map(|r| {
            Ok(Reading {
                meter_id: meter_id.clone(),
                timestamp: parse_timestamp(&r.timestamp, tz)?,
                energy_kwh_import: r.energy_kwh_import,
                channels: r.channels,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let inserted = state.twin.store().insert_readings(&readings).await?;
    info!(%meter_id, received = readings.len(), inserted, "Ingested readings");

    Ok(ApiResponse::success(IngestSummary {
        received: readings.len(),
        inserted,
    }))
}

/// GET /api/v1/meters
pub async fn list_meters(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<MeterSummary>>, ApiError> {
    let meters = state.twin.store().list_meters().await?;
    let count = meters.len();
    Ok(ApiResponse::success(meters).with_count(count))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LatestReadingsQuery {
    #[validate(range(min = 1, max = 10000))]
    pub limit: Option<usize>,
}

/// GET /api/v1/meters/:meter_id/readings/latest?limit=
///
/// Newest first; ten readings unless `limit` is given.
pub async fn latest_readings(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
    Query(q): Query<LatestReadingsQuery>,
) -> Result<ApiResponse<Vec<Reading>>, ApiError> {
    q.validate()?;
    let readings = state
        .twin
        .store()
        .latest_readings(&meter_id, q.limit.unwrap_or(10))
        .await?;
    let count = readings.len();
    Ok(ApiResponse::success(readings).with_count(count))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReadingHistoryQuery {
    #[validate(range(min = 1, max = 8760))]
    pub hours: Option<u32>,
}

/// GET /api/v1/meters/:meter_id/readings?hours=
///
/// Readings from the last `hours` (default 24), oldest first.
pub async fn reading_history(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
    Query(q): Query<ReadingHistoryQuery>,
) -> Result<ApiResponse<Vec<Reading>>, ApiError> {
    q.validate()?;
    let end = state.twin.now();
    let start = end - Duration::hours(i64::from(q.hours.unwrap_or(24)));
    let readings = state
        .twin
        .store()
        .readings_in_range(&meter_id, start, end)
        .await?;
    let count = readings.len();
    Ok(ApiResponse::success(readings).with_count(count))
}

/// GET /api/v1/models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.twin.registry().names())
}
