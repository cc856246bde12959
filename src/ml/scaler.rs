//! Min-max feature scaler fitted offline alongside the network.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maps each column to `[0, 1]` using the training minimum and maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn new(data_min: Vec<f64>, data_max: Vec<f64>) -> Result<Self> {
        if data_min.len() != data_max.len() {
            anyhow::bail!(
                "Scaler bounds differ in length: {} vs {}",
                data_min.len(),
                data_max.len()
            );
        }
        Ok(Self { data_min, data_max })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler artifact {}", path.display()))?;
        let scaler: MinMaxScaler = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse scaler artifact {}", path.display()))?;
        Self::new(scaler.data_min, scaler.data_max)
    }

    pub fn n_features(&self) -> usize {
        self.data_min.len()
    }

    /// Scale one row. Constant columns map to zero.
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.data_min.iter().zip(&self.data_max))
            .map(|(x, (min, max))| {
                let range = max - min;
                if range.abs() < f64::EPSILON {
                    0.0
                } else {
                    (x - min) / range
                }
            })
            .collect()
    }

    /// Undo scaling for a single column.
    pub fn inverse(&self, column: usize, scaled: f64) -> f64 {
        match (self.data_min.get(column), self.data_max.get(column)) {
            (Some(min), Some(max)) => scaled * (max - min) + min,
            _ => scaled,
        }
    }
}
