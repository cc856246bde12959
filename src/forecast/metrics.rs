//! Forecast Metrics and Evaluation
//!
//! Accuracy of a predicted series against observed readings. The two series
//! are joined on exact timestamp equality; only the overlap is scored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Forecast accuracy metrics.
///
/// `NaN` in either field means "not available": no timestamp overlapped, so
/// there was nothing to score. Serialized as JSON `null`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    #[serde(serialize_with = "nan_as_null", deserialize_with = "null_as_nan")]
    pub mae: f64,
    /// Root Mean Square Error
    #[serde(serialize_with = "nan_as_null", deserialize_with = "null_as_nan")]
    pub rmse: f64,
    /// Number of overlapping timestamps scored
    pub sample_count: usize,
}

impl ForecastMetrics {
    pub fn unavailable() -> Self {
        Self {
            mae: f64::NAN,
            rmse: f64::NAN,
            sample_count: 0,
        }
    }

    /// Score `predictions` against `actuals`.
    ///
    /// Pairs whose timestamps match exactly are kept; non-finite values on
    /// either side are ignored. If the same timestamp appears more than once in
    /// `actuals` the first occurrence wins.
    pub fn evaluate<A, P>(actuals: A, predictions: P) -> Self
    where
        A: IntoIterator<Item = (DateTime<Utc>, f64)>,
        P: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        let mut observed: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for (ts, value) in actuals {
            if value.is_finite() {
                observed.entry(ts).or_insert(value);
            }
        }

        let mut n = 0usize;
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for (ts, predicted) in predictions {
            if !predicted.is_finite() {
                continue;
            }
            if let Some(actual) = observed.get(&ts) {
                let error = actual - predicted;
                abs_sum += error.abs();
                sq_sum += error * error;
                n += 1;
            }
        }

        if n == 0 {
            return Self::unavailable();
        }

        Self {
            mae: abs_sum / n as f64,
            rmse: (sq_sum / n as f64).sqrt(),
            sample_count: n,
        }
    }

    pub fn is_available(&self) -> bool {
        self.mae.is_finite() && self.rmse.is_finite()
    }

    pub fn mae(&self) -> Option<f64> {
        self.mae.is_finite().then_some(self.mae)
    }

    pub fn rmse(&self) -> Option<f64> {
        self.rmse.is_finite().then_some(self.rmse)
    }
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl PartialEq for ForecastMetrics {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: f64, b: f64) -> bool {
            (a.is_nan() && b.is_nan()) || a == b
        }
        same(self.mae, other.mae)
            && same(self.rmse, other.rmse)
            && self.sample_count == other.sample_count
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_available() {
            return write!(f, "Metrics: unavailable (no overlap)");
        }
        write!(
            f,
            "Metrics: MAE={:.3}, RMSE={:.3}, n={}",
            self.mae, self.rmse, self.sample_count
        )
    }
}

fn nan_as_null<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_some(value)
    } else {
        serializer.serialize_none()
    }
}

fn null_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(values: &[f64], offset_steps: i64) -> Vec<(DateTime<Utc>, f64)> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + Duration::minutes(30 * (i as i64 + offset_steps)), *v))
            .collect()
    }

    #[test]
    fn test_perfect_forecast() {
        let actual = series(&[1.0, 2.0, 3.0], 0);
        let metrics = ForecastMetrics::evaluate(actual.clone(), actual);

        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.sample_count, 3);
    }

    #[test]
    fn test_known_errors() {
        let actual = series(&[100.0, 200.0, 300.0, 400.0], 0);
        let predicted = series(&[110.0, 190.0, 310.0, 390.0], 0);
        let metrics = ForecastMetrics::evaluate(actual, predicted);

        assert!((metrics.mae - 10.0).abs() < 1e-9);
        assert!((metrics.rmse - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_overlap_is_scored() {
        let actual = series(&[1.0, 2.0, 3.0, 4.0], 0);
        let predicted = series(&[3.0, 3.0, 3.0, 3.0], 2);
        let metrics = ForecastMetrics::evaluate(actual, predicted);

        // Overlap is steps 2 and 3: errors 0 and 1.
        assert_eq!(metrics.sample_count, 2);
        assert!((metrics.mae - 0.5).abs() < 1e-9);
        assert!((metrics.rmse - (0.5f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_no_overlap_is_unavailable() {
        let metrics = ForecastMetrics::evaluate(series(&[1.0, 2.0], 0), series(&[1.0, 2.0], 10));

        assert!(!metrics.is_available());
        assert!(metrics.mae.is_nan() && metrics.rmse.is_nan());
        assert_eq!(metrics.mae(), None);
    }

    #[test]
    fn test_empty_inputs_are_unavailable() {
        let metrics = ForecastMetrics::evaluate(Vec::new(), Vec::new());
        assert_eq!(metrics, ForecastMetrics::unavailable());
    }

    #[test]
    fn test_non_finite_values_are_skipped() {
        let actual = series(&[1.0, f64::NAN, 3.0], 0);
        let predicted = series(&[2.0, 2.0, f64::INFINITY], 0);
        let metrics = ForecastMetrics::evaluate(actual, predicted);

        assert_eq!(metrics.sample_count, 1);
        assert_eq!(metrics.mae, 1.0);
    }

    #[test]
    fn test_unavailable_serializes_as_null() {
        let json = serde_json::to_value(ForecastMetrics::unavailable()).unwrap();
        assert!(json["mae"].is_null());
        assert!(json["rmse"].is_null());

        let back: ForecastMetrics = serde_json::from_value(json).unwrap();
        assert!(!back.is_available());
    }

    #[test]
    fn test_metrics_display() {
        let metrics = ForecastMetrics::evaluate(series(&[1.0], 0), series(&[1.5], 0));
        let display = format!("{}", metrics);
        assert!(display.contains("MAE=0.500"));
        assert!(display.contains("n=1"));
    }
}
