//! Forecast model implementations
//!
//! - Baseline: random forest over calendar and weather features, trained per run
//! - Autoregressive: pre-trained LSTM rolled forward one step at a time

pub mod autoregressive;
pub mod baseline;

pub use autoregressive::*;
pub use baseline::*;
