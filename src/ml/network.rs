//! Single-layer LSTM regressor evaluated with `ndarray`.
//!
//! Weights are loaded from a JSON artifact exported by the offline training
//! job. Gate order inside the stacked matrices is input, forget, cell, output.

use anyhow::{Context, Result};
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk layout of the network weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkArtifact {
    pub input_size: usize,
    pub hidden_size: usize,
    /// `4 * hidden_size` rows of `input_size` columns
    pub w_input: Vec<Vec<f64>>,
    /// `4 * hidden_size` rows of `hidden_size` columns
    pub w_recurrent: Vec<Vec<f64>>,
    /// `4 * hidden_size`
    pub bias: Vec<f64>,
    /// `hidden_size`
    pub w_dense: Vec<f64>,
    pub b_dense: f64,
}

#[derive(Debug, Clone)]
pub struct LstmNetwork {
    input_size: usize,
    hidden_size: usize,
    w_input: Array2<f64>,
    w_recurrent: Array2<f64>,
    bias: Array1<f64>,
    w_dense: Array1<f64>,
    b_dense: f64,
}

impl LstmNetwork {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network artifact {}", path.display()))?;
        let artifact: NetworkArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse network artifact {}", path.display()))?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: NetworkArtifact) -> Result<Self> {
        let gates = 4 * artifact.hidden_size;
        if artifact.input_size == 0 || artifact.hidden_size == 0 {
            anyhow::bail!("Network dimensions must be positive");
        }
        if artifact.bias.len() != gates {
            anyhow::bail!("Bias has {} entries, expected {}", artifact.bias.len(), gates);
        }
        if artifact.w_dense.len() != artifact.hidden_size {
            anyhow::bail!(
                "Dense weights have {} entries, expected {}",
                artifact.w_dense.len(),
                artifact.hidden_size
            );
        }

        Ok(Self {
            input_size: artifact.input_size,
            hidden_size: artifact.hidden_size,
            w_input: to_array2(&artifact.w_input, gates, artifact.input_size, "w_input")?,
            w_recurrent: to_array2(
                &artifact.w_recurrent,
                gates,
                artifact.hidden_size,
                "w_recurrent",
            )?,
            bias: Array1::from(artifact.bias),
            w_dense: Array1::from(artifact.w_dense),
            b_dense: artifact.b_dense,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Run the sequence (rows are timesteps) and return the scalar output of
    /// the dense head applied to the final hidden state.
    pub fn forward(&self, sequence: &Array2<f64>) -> Result<f64> {
        if sequence.ncols() != self.input_size {
            anyhow::bail!(
                "Sequence has {} features, network expects {}",
                sequence.ncols(),
                self.input_size
            );
        }

        let h_size = self.hidden_size;
        let mut h = Array1::<f64>::zeros(h_size);
        let mut c = Array1::<f64>::zeros(h_size);

        for x in sequence.rows() {
            let z = self.w_input.dot(&x) + self.w_recurrent.dot(&h) + &self.bias;
            let i = gate(z.slice(s![0..h_size]), sigmoid);
            let f = gate(z.slice(s![h_size..2 * h_size]), sigmoid);
            let g = gate(z.slice(s![2 * h_size..3 * h_size]), f64::tanh);
            let o = gate(z.slice(s![3 * h_size..4 * h_size]), sigmoid);

            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f64::tanh);
        }

        Ok(self.w_dense.dot(&h) + self.b_dense)
    }
}

fn gate(z: ArrayView1<f64>, activation: fn(f64) -> f64) -> Array1<f64> {
    z.mapv(activation)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn to_array2(rows: &[Vec<f64>], n_rows: usize, n_cols: usize, name: &str) -> Result<Array2<f64>> {
    if rows.len() != n_rows || rows.iter().any(|r| r.len() != n_cols) {
        anyhow::bail!("{} must be {}x{}", name, n_rows, n_cols);
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat).with_context(|| format!("Invalid shape for {}", name))
}
