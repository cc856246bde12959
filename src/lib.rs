//! Smart-meter digital twin.
//!
//! Trains a forecasting model on a meter's recent history, predicts a window
//! (optionally under a what-if event), scores the forecast against whatever
//! actuals exist and records the run. Models are pluggable through
//! [`ml::ModelRegistry`]; a run that cannot use the requested model falls
//! back to the baseline and says why.

pub mod api;
pub mod config;
pub mod domain;
pub mod forecast;
pub mod ml;
pub mod repo;
pub mod telemetry;
pub mod twin;
