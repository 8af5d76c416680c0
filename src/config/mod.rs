//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler and its
//! periodic tasks.

mod builder;
mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    CommandConfig, RetryConfig, StorageConfig, TaskConfig, TendConfig, format_duration,
    parse_duration,
};
pub use yaml::YamlLoader;
