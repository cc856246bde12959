use serde::{Deserialize, Serialize};

/// Kind of hypothetical scenario applied on top of a forecast.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// Temperature raised by `magnitude` degrees Celsius.
    Heatwave,
    /// Temperature lowered by `magnitude` degrees Celsius.
    #[serde(alias = "coldSnap")]
    ColdSnap,
    /// Demand reduced by `magnitude` percent.
    #[serde(alias = "demandShutdownPercent")]
    DemandShutdownPercent,
}

/// What-if perturbation passed to a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventOverride {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub magnitude: f64,
}

impl EventOverride {
    pub fn new(kind: EventKind, magnitude: f64) -> Self {
        Self { kind, magnitude }
    }

    /// Additive shift in degrees Celsius applied to temperature inputs.
    pub fn temperature_shift(&self) -> f64 {
        match self.kind {
            EventKind::Heatwave => self.magnitude,
            EventKind::ColdSnap => -self.magnitude,
            EventKind::DemandShutdownPercent => 0.0,
        }
    }

    /// Multiplier applied to demand-derived values, clamped to `[0, 1]`.
    pub fn demand_factor(&self) -> f64 {
        match self.kind {
            EventKind::DemandShutdownPercent => (1.0 - self.magnitude / 100.0).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }
}

/// Temperature shift for an optional event.
pub fn temperature_shift(event: Option<&EventOverride>) -> f64 {
    event.map(EventOverride::temperature_shift).unwrap_or(0.0)
}

/// Demand multiplier for an optional event.
pub fn demand_factor(event: Option<&EventOverride>) -> f64 {
    event.map(EventOverride::demand_factor).unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_temperature_shift_sign() {
        assert_eq!(EventOverride::new(EventKind::Heatwave, 4.0).temperature_shift(), 4.0);
        assert_eq!(EventOverride::new(EventKind::ColdSnap, 4.0).temperature_shift(), -4.0);
        assert_eq!(temperature_shift(None), 0.0);
    }

    #[test]
    fn test_demand_factor_is_clamped() {
        let shutdown = EventOverride::new(EventKind::DemandShutdownPercent, 30.0);
        assert!((shutdown.demand_factor() - 0.7).abs() < 1e-12);

        let overshoot = EventOverride::new(EventKind::DemandShutdownPercent, 150.0);
        assert_eq!(overshoot.demand_factor(), 0.0);

        assert_eq!(demand_factor(None), 1.0);
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!(EventKind::from_str("cold_snap").unwrap(), EventKind::ColdSnap);

        let json = r#"{"type": "demandShutdownPercent", "magnitude": 20}"#;
        let event: EventOverride = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::DemandShutdownPercent);
        assert_eq!(event.kind.to_string(), "demand_shutdown_percent");
    }
}
