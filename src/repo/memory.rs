use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use super::{MeterStore, StoreError};
use crate::domain::{ForecastPrediction, ForecastRun, MeterSummary, Reading};

/// Process-local store with the same uniqueness and ordering rules as the
/// database schema.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    readings: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, Reading>>>,
    runs: RwLock<HashMap<Uuid, ForecastRun>>,
    predictions: RwLock<HashMap<Uuid, BTreeMap<DateTime<Utc>, ForecastPrediction>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with readings.
    pub fn with_readings(readings: impl IntoIterator<Item = Reading>) -> Self {
        let store = Self::new();
        {
            let mut map = store.readings.write();
            for r in readings {
                map.entry(r.meter_id.clone())
                    .or_default()
                    .entry(r.timestamp)
                    .or_insert(r);
            }
        }
        store
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }
}

#[async_trait]
impl MeterStore for InMemoryStore {
    async fn insert_readings(&self, readings: &[Reading]) -> Result<usize, StoreError> {
        let mut map = self.readings.write();
        let mut inserted = 0;
        for r in readings {
            let series = map.entry(r.meter_id.clone()).or_default();
            if !series.contains_key(&r.timestamp) {
                series.insert(r.timestamp, r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn readings_in_range(
        &self,
        meter_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        if end < start {
            return Ok(Vec::new());
        }
        Ok(self
            .readings
            .read()
            .get(meter_id)
            .map(|series| series.range(start..=end).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest_readings(
        &self,
        meter_id: &str,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(self
            .readings
            .read()
            .get(meter_id)
            .map(|series| series.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_meters(&self) -> Result<Vec<MeterSummary>, StoreError> {
        let readings = self.readings.read();
        let mut ids: BTreeSet<String> = readings.keys().cloned().collect();
        ids.extend(self.runs.read().values().map(|r| r.meter_id.clone()));

        Ok(ids
            .into_iter()
            .map(|meter_id| {
                let series = readings.get(&meter_id);
                MeterSummary {
                    reading_count: series.map_or(0, |s| s.len() as u64),
                    first_reading: series.and_then(|s| s.keys().next().copied()),
                    last_reading: series.and_then(|s| s.keys().next_back().copied()),
                    meter_id,
                }
            })
            .collect())
    }

    async fn upsert_run(&self, run: &ForecastRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        match runs.get_mut(&run.run_id) {
            Some(existing) => {
                let (mae, rmse) = (existing.mae, existing.rmse);
                *existing = run.clone();
                if !run.has_metrics() {
                    existing.mae = mae;
                    existing.rmse = rmse;
                }
            }
            None => {
                runs.insert(run.run_id, run.clone());
            }
        }
        Ok(())
    }

    async fn insert_predictions(
        &self,
        predictions: &[ForecastPrediction],
    ) -> Result<usize, StoreError> {
        let runs = self.runs.read();
        let mut map = self.predictions.write();
        let mut inserted = 0;
        for p in predictions {
            if !runs.contains_key(&p.run_id) {
                return Err(StoreError::RunNotFound(p.run_id));
            }
            let series = map.entry(p.run_id).or_default();
            if !series.contains_key(&p.timestamp) {
                series.insert(p.timestamp, p.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_run_metrics(
        &self,
        run_id: Uuid,
        mae: f64,
        rmse: f64,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.mae = Some(mae);
        run.rmse = Some(rmse);
        Ok(())
    }

    async fn latest_run(&self, meter_id: &str) -> Result<Option<ForecastRun>, StoreError> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|r| r.meter_id == meter_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn run_predictions(&self, run_id: Uuid) -> Result<Vec<ForecastPrediction>, StoreError> {
        Ok(self
            .predictions
            .read()
            .get(&run_id)
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let existed = self.runs.write().remove(&run_id).is_some();
        self.predictions.write().remove(&run_id);
        Ok(existed)
    }
}
