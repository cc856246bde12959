use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MeterStore, StoreError};
use crate::config::DbConfig;
use crate::domain::{AuxiliaryChannels, ForecastPrediction, ForecastRun, MeterSummary, Reading};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, FromRow)]
struct ReadingRow {
    meter_id: String,
    timestamp: DateTime<Utc>,
    energy_kwh_import: Option<f64>,
    voltage_vrn: Option<f64>,
    voltage_vyn: Option<f64>,
    voltage_vbn: Option<f64>,
    current_ir: Option<f64>,
    current_iy: Option<f64>,
    current_ib: Option<f64>,
    energy_kvah_import: Option<f64>,
    energy_kwh_export: Option<f64>,
    energy_kvah_export: Option<f64>,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            meter_id: row.meter_id,
            timestamp: row.timestamp,
            energy_kwh_import: row.energy_kwh_import,
            channels: AuxiliaryChannels {
                voltage_vrn: row.voltage_vrn,
                voltage_vyn: row.voltage_vyn,
                voltage_vbn: row.voltage_vbn,
                current_ir: row.current_ir,
                current_iy: row.current_iy,
                current_ib: row.current_ib,
                energy_kvah_import: row.energy_kvah_import,
                energy_kwh_export: row.energy_kwh_export,
                energy_kvah_export: row.energy_kvah_export,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct MeterRow {
    meter_id: String,
    reading_count: i64,
    first_reading: Option<DateTime<Utc>>,
    last_reading: Option<DateTime<Utc>>,
}

impl From<MeterRow> for MeterSummary {
    fn from(row: MeterRow) -> Self {
        MeterSummary {
            meter_id: row.meter_id,
            reading_count: u64::try_from(row.reading_count).unwrap_or(0),
            first_reading: row.first_reading,
            last_reading: row.last_reading,
        }
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: Uuid,
    meter_id: String,
    model_requested: String,
    model_used: String,
    fallback_reason: Option<String>,
    prediction_start: DateTime<Utc>,
    prediction_end: DateTime<Utc>,
    training_window_start: Option<DateTime<Utc>>,
    training_window_end: Option<DateTime<Utc>>,
    mae: Option<f64>,
    rmse: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<RunRow> for ForecastRun {
    fn from(row: RunRow) -> Self {
        ForecastRun {
            run_id: row.run_id,
            meter_id: row.meter_id,
            model_requested: row.model_requested,
            model_used: row.model_used,
            fallback_reason: row.fallback_reason,
            prediction_start: row.prediction_start,
            prediction_end: row.prediction_end,
            training_window_start: row.training_window_start,
            training_window_end: row.training_window_end,
            mae: row.mae,
            rmse: row.rmse,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PredictionRow {
    run_id: Uuid,
    timestamp: DateTime<Utc>,
    predicted_kwh: f64,
    actual_kwh: Option<f64>,
}

impl From<PredictionRow> for ForecastPrediction {
    fn from(row: PredictionRow) -> Self {
        ForecastPrediction {
            run_id: row.run_id,
            timestamp: row.timestamp,
            predicted_kwh: row.predicted_kwh,
            actual_kwh: row.actual_kwh,
        }
    }
}

/// Postgres-backed meter store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with exponential backoff.
    pub async fn connect(cfg: &DbConfig) -> anyhow::Result<Self> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            attempt += 1;
            let result = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
                .connect(&cfg.url)
                .await;

            match result {
                Ok(pool) => {
                    info!(attempt, "Connected to Postgres");
                    return Ok(Self { pool });
                }
                Err(e) if attempt >= cfg.connect_attempts => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "Failed to connect to database after {} attempts",
                        attempt
                    )));
                }
                Err(e) => {
                    warn!(
                        "Database connection attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, cfg.connect_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Database schema ready");
        Ok(())
    }

    async fn ensure_meter(&self, meter_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO meters (meter_id) VALUES ($1) ON CONFLICT (meter_id) DO NOTHING")
            .bind(meter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MeterStore for PgStore {
    async fn insert_readings(&self, readings: &[Reading]) -> Result<usize, StoreError> {
        if readings.is_empty() {
            return Ok(0);
        }

        let mut meters: Vec<&str> = readings.iter().map(|r| r.meter_id.as_str()).collect();
        meters.sort_unstable();
        meters.dedup();
        for meter in meters {
            self.ensure_meter(meter).await?;
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for r in readings {
            let c = &r.channels;
            let result = sqlx::query(
                r#"
                INSERT INTO readings (
                    meter_id, timestamp, energy_kwh_import,
                    voltage_vrn, voltage_vyn, voltage_vbn,
                    current_ir, current_iy, current_ib,
                    energy_kvah_import, energy_kwh_export, energy_kvah_export
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (meter_id, timestamp) DO NOTHING
                "#,
            )
            .bind(&r.meter_id)
            .bind(r.timestamp)
            .bind(r.energy_kwh_import)
            .bind(c.voltage_vrn)
            .bind(c.voltage_vyn)
            .bind(c.voltage_vbn)
            .bind(c.current_ir)
            .bind(c.current_iy)
            .bind(c.current_ib)
            .bind(c.energy_kvah_import)
            .bind(c.energy_kwh_export)
            .bind(c.energy_kvah_export)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        info!(inserted, total = readings.len(), "Inserted readings");
        Ok(inserted)
    }

    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT meter_id, timestamp, energy_kwh_import,
                   voltage_vrn, voltage_vyn, voltage_vbn,
                   current_ir, current_iy, current_ib,
                   energy_kvah_import, energy_kwh_export, energy_kvah_export
            FROM readings
            WHERE meter_id = $1 AND timestamp >= $2 AND timestamp <= $3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(meter_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        debug!(meter_id, count = rows.len(), %start, %end, "Fetched readings in range");
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn latest_readings(
        &self,
        meter_id: &str,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT meter_id, timestamp, energy_kwh_import,
                   voltage_vrn, voltage_vyn, voltage_vbn,
                   current_ir, current_iy, current_ib,
                   energy_kvah_import, energy_kwh_export, energy_kvah_export
            FROM readings
            WHERE meter_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(meter_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn list_meters(&self) -> Result<Vec<MeterSummary>, StoreError> {
        let rows: Vec<MeterRow> = sqlx::query_as(
            r#"
            SELECT m.meter_id,
                   COUNT(r.id) AS reading_count,
                   MIN(r.timestamp) AS first_reading,
                   MAX(r.timestamp) AS last_reading
            FROM meters m
            LEFT JOIN readings r ON r.meter_id = m.meter_id
            GROUP BY m.meter_id
            ORDER BY m.meter_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MeterSummary::from).collect())
    }

    async fn upsert_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        self.ensure_meter(&run.meter_id).await?;

        sqlx::query(
            r#"
            INSERT INTO forecast_runs (
                run_id, meter_id, model_requested, model_used, fallback_reason,
                prediction_start, prediction_end, training_window_start, training_window_end,
                mae, rmse, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (run_id) DO UPDATE SET
                model_requested = EXCLUDED.model_requested,
                model_used = EXCLUDED.model_used,
                fallback_reason = EXCLUDED.fallback_reason,
                prediction_start = EXCLUDED.prediction_start,
                prediction_end = EXCLUDED.prediction_end,
                training_window_start = EXCLUDED.training_window_start,
                training_window_end = EXCLUDED.training_window_end,
                mae = COALESCE(EXCLUDED.mae, forecast_runs.mae),
                rmse = COALESCE(EXCLUDED.rmse, forecast_runs.rmse)
            "#,
        )
        .bind(run.run_id)
        .bind(&run.meter_id)
        .bind(&run.model_requested)
        .bind(&run.model_used)
        .bind(&run.fallback_reason)
        .bind(run.prediction_start)
        .bind(run.prediction_end)
        .bind(run.training_window_start)
        .bind(run.training_window_end)
        .bind(run.mae)
        .bind(run.rmse)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.run_id, meter_id = %run.meter_id, "Upserted forecast run");
        Ok(())
    }

    async fn insert_predictions(
        &self,
        predictions: &[ForecastPrediction],
    ) -> Result<usize, StoreError> {
        if predictions.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for p in predictions {
            let result = sqlx::query(
                r#"
                INSERT INTO forecast_predictions (run_id, timestamp, predicted_kwh, actual_kwh)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (run_id, timestamp) DO NOTHING
                "#,
            )
            .bind(p.run_id)
            .bind(p.timestamp)
            .bind(p.predicted_kwh)
            .bind(p.actual_kwh)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn update_run_metrics(
        &self,
        run_id: Uuid,
        mae: f64,
        rmse: f64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE forecast_runs SET mae = $2, rmse = $3 WHERE run_id = $1")
            .bind(run_id)
            .bind(mae)
            .bind(rmse)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn latest_run(&self, meter_id: &str) -> Result<Option<ForecastRun>, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT run_id, meter_id, model_requested, model_used, fallback_reason,
                   prediction_start, prediction_end, training_window_start, training_window_end,
                   mae, rmse, created_at
            FROM forecast_runs
            WHERE meter_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(meter_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ForecastRun::from))
    }

    async fn run_predictions(&self, run_id: Uuid) -> Result<Vec<ForecastPrediction>, StoreError> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            r#"
            SELECT run_id, timestamp, predicted_kwh, actual_kwh
            FROM forecast_predictions
            WHERE run_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ForecastPrediction::from).collect())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM forecast_runs WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
