//! Core configuration trait

use crate::errors::{ArborError, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Common behavior of Arbor configuration types
pub trait ArborConfig: Clone + Default + DeserializeOwned + Send + Sync + 'static {
    /// Prefix of environment variables that override fields
    const ENV_PREFIX: &'static str = "ARBOR_";

    /// Get default configuration values
    fn defaults() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML or JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArborError::config(format!("Failed to read {}: {e}", path.display()))
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ArborError::config(format!("Invalid JSON: {e}")))?,
            _ => return Err(ArborError::config("Unsupported file format")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    fn merge_with_env(&mut self) -> Result<()> {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(Self::ENV_PREFIX)
                    .map(|rest| (rest.to_lowercase(), value))
            })
            .collect();
        self.merge_with_vars(vars)
    }

    /// Apply `(key, value)` overrides; unknown keys are skipped
    fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if !self.knows_key(&key) {
                continue;
            }
            self.set_from_string(&key, &value)?;
        }
        self.validate()
    }

    /// Whether `key` names a field of this configuration
    fn knows_key(&self, key: &str) -> bool;

    /// Set a field from its string form
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Validate the configuration
    fn validate(&self) -> Result<()>;
}
