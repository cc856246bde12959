//! Persistence for meter readings and forecast runs.
//!
//! [`MeterStore`] is the seam the orchestrator talks to. The in-memory store
//! backs tests and database-less deployments; the Postgres store is compiled
//! with the `db` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{ForecastPrediction, ForecastRun, MeterSummary, Reading};

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::InMemoryStore;
#[cfg(feature = "db")]
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Forecast run {0} not found")]
    RunNotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Readings and forecast-run persistence.
///
/// Readings are unique per `(meter_id, timestamp)` and predictions per
/// `(run_id, timestamp)`; inserting a duplicate is a silent no-op. Range
/// queries are inclusive on both ends and return ascending timestamps.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeterStore: Send + Sync {
    /// Insert readings, returning how many were new.
    async fn insert_readings(&self, readings: &[Reading]) -> Result<usize, StoreError>;

    /// Readings with `start <= timestamp <= end`, ascending.
    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Most recent readings, newest first.
    async fn latest_readings(&self, meter_id: &str, limit: usize)
        -> Result<Vec<Reading>, StoreError>;

    /// Every known meter with its reading span, ordered by id.
    async fn list_meters(&self) -> Result<Vec<MeterSummary>, StoreError>;

    /// Create the run, or refresh its descriptive fields if it exists.
    /// Metrics already recorded are kept when the incoming run has none.
    async fn upsert_run(&self, run: &ForecastRun) -> Result<(), StoreError>;

    /// Insert predictions for an existing run, returning how many were new.
    async fn insert_predictions(
        &self,
        predictions: &[ForecastPrediction],
    ) -> Result<usize, StoreError>;

    async fn update_run_metrics(&self, run_id: Uuid, mae: f64, rmse: f64)
        -> Result<(), StoreError>;

    /// Most recently created run for the meter.
    async fn latest_run(&self, meter_id: &str) -> Result<Option<ForecastRun>, StoreError>;

    /// Predictions of a run, ascending by timestamp.
    async fn run_predictions(&self, run_id: Uuid) -> Result<Vec<ForecastPrediction>, StoreError>;

    /// Remove a run and its predictions. `false` if it did not exist.
    async fn delete_run(&self, run_id: Uuid) -> Result<bool, StoreError>;
}

/// Pick the store backend from configuration.
///
/// With the `db` feature and a database URL set, connects to Postgres and
/// applies the schema; otherwise readings live in memory for the lifetime of
/// the process.
pub async fn connect(cfg: &Config) -> anyhow::Result<Arc<dyn MeterStore>> {
    #[cfg(feature = "db")]
    {
        if !cfg.db.url.is_empty() {
            let store = PgStore::connect(&cfg.db).await?;
            store.migrate().await?;
            info!("Using Postgres meter store");
            return Ok(Arc::new(store));
        }
        warn!("db feature enabled but no database url configured");
    }

    #[cfg(not(feature = "db"))]
    {
        if !cfg.db.url.is_empty() {
            warn!("Database url configured but the db feature is not compiled in");
        }
    }

    info!("Using in-memory meter store");
    Ok(Arc::new(InMemoryStore::new()))
}
