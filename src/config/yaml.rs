//! YAML configuration parsing.
//!
//! Parses the scheduler configuration and its periodic task list from YAML.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{StorageConfig, TendConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<TendConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TendConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<TendConfig, ConfigError> {
        let config: TendConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validate a parsed configuration.
    pub fn validate_config(config: &TendConfig) -> Result<(), ConfigError> {
        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "configuration must define at least one task".into(),
            ));
        }

        // A zero tick would spin the scheduler loop.
        if config.tick_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "tick_interval cannot be zero".into(),
            ));
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts cannot be zero".into(),
            ));
        }
        if config.retry.initial_delay > config.retry.max_delay {
            return Err(ConfigError::InvalidConfig(
                "retry.initial_delay exceeds retry.max_delay".into(),
            ));
        }

        let mut names = HashSet::new();
        for task in &config.tasks {
            if task.name.trim().is_empty() {
                return Err(ConfigError::MissingField("tasks[].name".into()));
            }
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task name: {}",
                    task.name
                )));
            }

            task.definition()
                .validate()
                .map_err(|e| ConfigError::InvalidConfig(format!("task '{}': {}", task.name, e)))?;

            if let Some(command) = &task.command
                && command.program.trim().is_empty()
            {
                return Err(ConfigError::MissingField(format!(
                    "tasks[{}].command.program",
                    task.name
                )));
            }
        }

        Ok(())
    }
}
