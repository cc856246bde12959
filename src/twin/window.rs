use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{SimulationError, WindowMode};

/// Closed interval `[start, end]` over which predictions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mode: WindowMode,
}

impl PredictionWindow {
    /// Caller-supplied window. Must be non-empty.
    pub fn explicit(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SimulationError> {
        if start >= end {
            return Err(SimulationError::InvalidWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            mode: WindowMode::Explicit,
        })
    }

    /// Window of `horizon` starting at `start`. A degenerate result is widened
    /// to one sampling interval.
    pub fn inferred(start: DateTime<Utc>, horizon: Duration, sampling_interval: Duration) -> Self {
        let mut end = start + horizon;
        if start >= end {
            end = start + sampling_interval;
        }
        Self {
            start,
            end,
            mode: WindowMode::Inferred,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
    }

    #[test]
    fn test_explicit_rejects_empty_window() {
        assert!(matches!(
            PredictionWindow::explicit(t0(), t0()),
            Err(SimulationError::InvalidWindow { .. })
        ));
        assert!(PredictionWindow::explicit(t0(), t0() - Duration::hours(1)).is_err());

        let window = PredictionWindow::explicit(t0(), t0() + Duration::hours(1)).unwrap();
        assert_eq!(window.mode, WindowMode::Explicit);
    }

    #[test]
    fn test_inferred_spans_horizon() {
        let window = PredictionWindow::inferred(t0(), Duration::hours(24), Duration::minutes(15));
        assert_eq!(window.duration(), Duration::hours(24));
        assert_eq!(window.mode, WindowMode::Inferred);
    }

    #[test]
    fn test_inferred_degenerate_is_widened() {
        let window = PredictionWindow::inferred(t0(), Duration::zero(), Duration::minutes(15));
        assert_eq!(window.end, t0() + Duration::minutes(15));
    }
}
