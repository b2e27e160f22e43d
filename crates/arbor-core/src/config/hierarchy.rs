//! Hierarchy configuration

use super::traits::ArborConfig;
use crate::errors::{ArborError, Result};
use serde::{Deserialize, Serialize};

/// Settings for a composition hierarchy and its coordination thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Name given to the dedicated coordination thread
    pub coordination_thread_name: String,
    /// Bound on queued coordination jobs; `None` is unbounded
    pub dispatch_queue_capacity: Option<usize>,
    /// Marshal thread-affine listeners onto the coordination thread
    pub enforce_listener_affinity: bool,
    /// Fail single-cardinality queries that match more than one export
    pub strict_cardinality: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            coordination_thread_name: "arbor-coordination".to_string(),
            dispatch_queue_capacity: None,
            enforce_listener_affinity: true,
            strict_cardinality: true,
        }
    }
}

const KEYS: &[&str] = &[
    "coordination_thread_name",
    "dispatch_queue_capacity",
    "enforce_listener_affinity",
    "strict_cardinality",
];

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| ArborError::config(format!("Invalid boolean for {key}: {value}")))
}

impl ArborConfig for HierarchyConfig {
    fn knows_key(&self, key: &str) -> bool {
        KEYS.contains(&key.replace('-', "_").as_str())
    }

    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key.replace('-', "_").as_str() {
            "coordination_thread_name" => self.coordination_thread_name = value.to_string(),
            "dispatch_queue_capacity" => {
                self.dispatch_queue_capacity = match value {
                    "" | "none" | "unbounded" => None,
                    n => Some(n.parse::<usize>().map_err(|_| {
                        ArborError::config(format!("Invalid queue capacity: {n}"))
                    })?),
                };
            }
            "enforce_listener_affinity" => {
                self.enforce_listener_affinity = parse_bool(key, value)?;
            }
            "strict_cardinality" => self.strict_cardinality = parse_bool(key, value)?,
            other => {
                return Err(ArborError::config(format!(
                    "Unknown configuration key: {other}"
                )))
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.coordination_thread_name.trim().is_empty() {
            return Err(ArborError::config("Coordination thread name cannot be empty"));
        }
        if self.dispatch_queue_capacity == Some(0) {
            return Err(ArborError::config("Dispatch queue capacity cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = HierarchyConfig::defaults();
        assert!(config.validate().is_ok());
        assert!(config.strict_cardinality);
        assert_eq!(config.dispatch_queue_capacity, None);
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "coordination_thread_name = \"ui\"\ndispatch_queue_capacity = 64\nstrict_cardinality = false"
        )
        .unwrap();

        let config = HierarchyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.coordination_thread_name, "ui");
        assert_eq!(config.dispatch_queue_capacity, Some(64));
        assert!(!config.strict_cardinality);
        assert!(config.enforce_listener_affinity);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "dispatch_queue_capacity = 0").unwrap();
        assert!(matches!(
            HierarchyConfig::load_from_file(file.path()),
            Err(ArborError::Config { .. })
        ));
    }

    #[test]
    fn test_var_overrides_skip_unknown_keys() {
        let mut config = HierarchyConfig::default();
        config
            .merge_with_vars(vec![
                ("strict_cardinality".to_string(), "false".to_string()),
                ("dispatch_queue_capacity".to_string(), "8".to_string()),
                ("log".to_string(), "debug".to_string()),
            ])
            .unwrap();
        assert!(!config.strict_cardinality);
        assert_eq!(config.dispatch_queue_capacity, Some(8));
    }

    #[test]
    fn test_bad_boolean() {
        let mut config = HierarchyConfig::default();
        assert!(config.set_from_string("strict-cardinality", "maybe").is_err());
    }
}
