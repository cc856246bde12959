//! SmartCore RandomForest wrapper
//!
//! Flattens row-major feature tables into a `DenseMatrix` and keeps the fitted
//! regressor together with the feature layout it was trained on.

use super::{ForestParams, ModelError};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

type Regressor = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

pub struct SmartcoreRandomForest {
    model: Regressor,
    n_features: usize,
    training_samples: usize,
}

impl std::fmt::Debug for SmartcoreRandomForest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartcoreRandomForest")
            .field("n_features", &self.n_features)
            .field("training_samples", &self.training_samples)
            .finish()
    }
}

impl SmartcoreRandomForest {
    pub fn parameters(params: &ForestParams) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            min_samples_split: params.min_samples_split,
            n_trees: params.n_trees,
            m: None, // sqrt(n_features)
            keep_samples: false,
            seed: params.seed,
        }
    }

    /// Train a new RandomForest model
    pub fn train(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Result<Self, ModelError> {
        if x.is_empty() || y.is_empty() {
            return Err(ModelError::Training("cannot train on empty dataset".into()));
        }

        if x.len() != y.len() {
            return Err(ModelError::Training(format!(
                "feature and target count mismatch: {} rows, {} targets",
                x.len(),
                y.len()
            )));
        }

        let x_matrix = to_matrix(x)?;
        let n_features = x[0].len();

        let model = RandomForestRegressor::fit(&x_matrix, &y.to_vec(), Self::parameters(params))
            .map_err(|e| ModelError::Training(format!("RandomForest training failed: {:?}", e)))?;

        Ok(Self {
            model,
            n_features,
            training_samples: x.len(),
        })
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        if x[0].len() != self.n_features {
            return Err(ModelError::Prediction(format!(
                "feature count mismatch: expected {}, got {}",
                self.n_features,
                x[0].len()
            )));
        }

        let x_matrix = to_matrix(x).map_err(|e| ModelError::Prediction(e.to_string()))?;
        self.model
            .predict(&x_matrix)
            .map_err(|e| ModelError::Prediction(format!("RandomForest prediction failed: {:?}", e)))
    }

    pub fn training_samples(&self) -> usize {
        self.training_samples
    }
}

fn to_matrix(x: &[Vec<f64>]) -> Result<DenseMatrix<f64>, ModelError> {
    let n_samples = x.len();
    let n_features = x[0].len();

    let mut flat_data = Vec::with_capacity(n_samples * n_features);
    for row in x {
        if row.len() != n_features {
            return Err(ModelError::Training(
                "all feature vectors must have the same length".into(),
            ));
        }
        flat_data.extend_from_slice(row);
    }

    Ok(DenseMatrix::new(n_samples, n_features, flat_data, false))
}
