//! Model registry
//!
//! Maps model names to factories that build a fresh, untrained model for each
//! simulation run. Lookup goes through a single naming convention so that
//! "Baseline", "baseline-model" and "baseline_model" all resolve to the same
//! entry.

use super::models::{AutoregressiveForecastModel, BaselineForecastModel};
use super::{ForecastModel, ModelContext, ModelError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const BASELINE_MODEL: &str = "baseline";
pub const AUTOREGRESSIVE_MODEL: &str = "autoregressive";

/// Builds a model instance from the shared context.
pub type ModelFactory =
    Arc<dyn Fn(&ModelContext) -> Result<Box<dyn ForecastModel>, ModelError> + Send + Sync>;

pub struct ModelRegistry {
    context: ModelContext,
    factories: RwLock<HashMap<String, ModelFactory>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl ModelRegistry {
    /// Empty registry.
    pub fn new(context: ModelContext) -> Self {
        Self {
            context,
            factories: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the baseline and autoregressive models.
    pub fn with_defaults(context: ModelContext) -> Self {
        let registry = Self::new(context);
        registry.register(BASELINE_MODEL, |ctx: &ModelContext| {
            Ok(Box::new(BaselineForecastModel::new(ctx.timezone, ctx.forest)) as Box<dyn ForecastModel>)
        });
        registry.register(AUTOREGRESSIVE_MODEL, |ctx: &ModelContext| {
            Ok(Box::new(AutoregressiveForecastModel::load(ctx)?) as Box<dyn ForecastModel>)
        });
        registry.alias("dl", AUTOREGRESSIVE_MODEL);
        registry.alias("lstm", AUTOREGRESSIVE_MODEL);
        registry
    }

    /// Canonical form of a model name: trimmed, lowercase, `-` and spaces
    /// read as `_`, and a trailing `_model` dropped.
    pub fn canonical_name(name: &str) -> String {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.strip_suffix("_model") {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => normalized,
        }
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&ModelContext) -> Result<Box<dyn ForecastModel>, ModelError> + Send + Sync + 'static,
    {
        let key = Self::canonical_name(name);
        debug!(model = %key, "Registering forecast model");
        self.factories.write().insert(key, Arc::new(factory));
    }

    /// Make `alias` resolve to the model registered as `target`.
    pub fn alias(&self, alias: &str, target: &str) {
        self.aliases
            .write()
            .insert(Self::canonical_name(alias), Self::canonical_name(target));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories
            .write()
            .remove(&Self::canonical_name(name))
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(&self.resolved_name(name))
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a fresh instance of the named model.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn ForecastModel>, ModelError> {
        let key = self.resolved_name(name);
        let factory = self
            .factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| ModelError::NotFound {
                name: name.to_string(),
            })?;

        let model = factory(&self.context).map_err(|e| match e {
            ModelError::LoadFailed { .. } => e,
            other => ModelError::LoadFailed {
                name: key.clone(),
                reason: other.to_string(),
            },
        })?;

        info!(requested = %name, model = %model.name(), "Resolved forecast model");
        Ok(model)
    }

    /// Registry key `name` resolves to, after normalisation and aliases.
    pub fn resolved_name(&self, name: &str) -> String {
        let key = Self::canonical_name(name);
        self.aliases.read().get(&key).cloned().unwrap_or(key)
    }
}
