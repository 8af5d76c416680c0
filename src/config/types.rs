//! Configuration type definitions.
//!
//! This module contains the type definitions for the YAML configuration file
//! (`tend.yaml`): storage, scheduler timing, retry policy and periodic tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::definition::ExistingPolicy;
use crate::core::retry::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, MAX_ATTEMPTS};

/// Top-level configuration (tend.yaml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TendConfig {
    /// Registry backend.
    pub storage: StorageConfig,
    /// How often the scheduler checks for due tasks.
    #[serde(with = "duration_format")]
    pub tick_interval: Duration,
    /// How long shutdown waits for running tasks.
    #[serde(with = "duration_format")]
    pub shutdown_timeout: Duration,
    /// Retry policy shared by all tasks.
    pub retry: RetryConfig,
    /// Periodic tasks.
    pub tasks: Vec<TaskConfig>,
}

impl Default for TendConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            tick_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            tasks: Vec::new(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts allowed per period.
    pub max_attempts: u32,
    /// Delay growth between retries.
    pub backoff: BackoffPolicy,
    /// Delay before the first retry.
    #[serde(with = "duration_format")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "duration_format")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: BackoffPolicy::Exponential,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// One periodic task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task name.
    pub name: String,
    /// Nominal period.
    #[serde(with = "duration_format")]
    pub interval: Duration,
    /// Flex window before the nominal fire time.
    #[serde(default, with = "duration_format")]
    pub flex: Duration,
    /// Registration policy when the task already exists.
    #[serde(default)]
    pub policy: ExistingPolicy,
    /// External command to run as the task body. Tasks without one are
    /// registered only; their body must be bound in code.
    pub command: Option<CommandConfig>,
}

/// External command task body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute.
    pub program: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// Time limit for one run.
    #[serde(default, with = "optional_duration_format")]
    pub timeout: Option<Duration>,
}

/// Parse a duration string like "30s", "15m", "6h", "1h30m" or "1d".
///
/// A bare `0` is accepted so flex windows can be disabled explicitly.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total_secs: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else {
            let num: u64 = current_num.parse().map_err(|_| invalid())?;
            current_num.clear();

            let unit = match c {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                _ => return Err(invalid()),
            };
            total_secs = num
                .checked_mul(unit)
                .and_then(|secs| total_secs.checked_add(secs))
                .ok_or_else(invalid)?;
        }
    }

    // Trailing digits with no unit.
    if !current_num.is_empty() {
        return Err(invalid());
    }

    Ok(Duration::from_secs(total_secs))
}

/// Render a duration in the largest units that divide it, e.g. "1h30m".
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// Serde helper: durations as human strings, or bare integer seconds.
pub(crate) mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse_duration(&text).map_err(D::Error::custom),
        }
    }
}

/// Serde helper: optional durations.
pub(crate) mod optional_duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    struct Wrapper(#[serde(with = "super::duration_format")] Duration);

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::duration_format::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(d)| d))
    }
}
