use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

use crate::forecast::GeoLocation;
use crate::ml::{ArtifactPaths, ForestParams, ModelContext};

pub const ENV_PREFIX: &str = "MTWIN__";
pub const DEFAULT_CONFIG_FILE: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub location: Option<LocationConfig>,
    #[validate(nested)]
    pub weather: WeatherConfig,
    #[validate(nested)]
    pub models: ModelsConfig,
    #[validate(nested)]
    pub db: DbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1, max = 3600))]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 120,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is not set.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    /// IANA zone used to interpret naive timestamps and calendar features.
    pub timezone: String,
    /// Native resolution of meter readings.
    #[validate(range(min = 1, max = 1440))]
    pub sampling_interval_minutes: u32,
    /// Spacing of predicted points.
    #[validate(range(min = 1, max = 1440))]
    pub step_interval_minutes: u32,
    #[validate(range(min = 1))]
    pub default_training_hours: u32,
    #[validate(range(min = 1))]
    pub default_horizon_hours: u32,
    #[validate(range(min = 1))]
    pub max_horizon_hours: u32,
    /// Lower bound on lookback when the autoregressive model is requested.
    pub min_training_hours_autoregressive: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            sampling_interval_minutes: 15,
            step_interval_minutes: 30,
            default_training_hours: 336,
            default_horizon_hours: 24,
            max_horizon_hours: 168,
            min_training_hours_autoregressive: 168,
        }
    }
}

impl SimulationConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 26.9124,
            longitude: 75.7873,
            name: Some("Jaipur".to_string()),
        }
    }
}

impl From<&LocationConfig> for GeoLocation {
    fn from(cfg: &LocationConfig) -> Self {
        GeoLocation {
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            name: cfg.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    #[validate(url)]
    pub base_url: String,
    #[validate(range(min = 1, max = 300))]
    pub http_timeout_seconds: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: crate::forecast::OPEN_METEO_ARCHIVE_URL.to_string(),
            http_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ModelsConfig {
    pub artifacts_dir: PathBuf,
    pub network_file: String,
    pub scaler_file: String,
    #[validate(range(min = 1, max = 1000))]
    pub baseline_trees: usize,
    pub baseline_max_depth: Option<u16>,
    pub seed: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("models"),
            network_file: "autoregressive_network.json".to_string(),
            scaler_file: "autoregressive_scaler.json".to_string(),
            baseline_trees: 100,
            baseline_max_depth: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DbConfig {
    /// Empty means in-memory storage.
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub connect_attempts: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            connect_attempts: 5,
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `MTWIN__SECTION__KEY`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file(DEFAULT_CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("Failed to load configuration")?;
        cfg.validate().context("Invalid configuration")?;
        cfg.simulation.tz()?;
        if cfg.simulation.max_horizon_hours < cfg.simulation.default_horizon_hours {
            anyhow::bail!(
                "simulation.max_horizon_hours ({}) is below default_horizon_hours ({})",
                cfg.simulation.max_horizon_hours,
                cfg.simulation.default_horizon_hours
            );
        }
        Ok(cfg)
    }

    pub fn model_context(&self) -> Result<ModelContext> {
        let artifacts = ArtifactPaths::in_dir(
            &self.models.artifacts_dir,
            &self.models.network_file,
            &self.models.scaler_file,
        );
        let forest = ForestParams {
            n_trees: self.models.baseline_trees,
            max_depth: self.models.baseline_max_depth,
            seed: self.models.seed,
            ..ForestParams::default()
        };
        Ok(ModelContext::new(self.simulation.tz()?, artifacts).with_forest(forest))
    }
}
