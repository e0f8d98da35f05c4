//! Configuration system for gatehouse.
//!
//! Config is read from a TOML file. Every section and field has a default, so
//! an empty file (or no file at all) yields a working coordinator.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

// ============================================================================
// Coordinator Configuration
// ============================================================================

/// Coordinator loop and reader pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
  /// Maximum number of reads executing against the resource at once
  /// (0 = number of CPUs)
  pub reader_pool_size: usize,

  /// Capacity of the inbound operation channel
  pub queue_capacity: usize,

  /// How long a write (or exclusive unit-of-work step) waits for in-flight
  /// reads to drain before failing with a timeout
  pub max_wait_for_resource_ms: u64,

  /// How long an open unit of work waits for its next message before it is
  /// abandoned
  pub max_wait_for_work_unit_ms: u64,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      reader_pool_size: 0,
      queue_capacity: 1024,
      max_wait_for_resource_ms: 30_000,
      max_wait_for_work_unit_ms: 10_000,
    }
  }
}

impl CoordinatorConfig {
  /// Effective reader pool size, resolving 0 to the CPU count
  pub fn effective_pool_size(&self) -> usize {
    if self.reader_pool_size == 0 {
      num_cpus::get().max(1)
    } else {
      self.reader_pool_size
    }
  }

  pub fn max_wait_for_resource(&self) -> Duration {
    Duration::from_millis(self.max_wait_for_resource_ms)
  }

  pub fn max_wait_for_work_unit(&self) -> Duration {
    Duration::from_millis(self.max_wait_for_work_unit_ms)
  }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Busy-retry policy for calls to the external resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total attempts per call, including the first (must be >= 1)
  pub max_tries: u32,

  /// Fixed pause between attempts after a busy response
  pub retry_interval_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_tries: 2,
      retry_interval_ms: 500,
    }
  }
}

impl RetryConfig {
  pub fn retry_interval(&self) -> Duration {
    Duration::from_millis(self.retry_interval_ms)
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging settings used by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  #[serde(default = "default_log_rotation")]
  pub log_rotation: String,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_log_rotation() -> String {
  "daily".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      log_rotation: default_log_rotation(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// gatehouse configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Coordinator loop and reader pool settings
  #[serde(default)]
  pub coordinator: CoordinatorConfig,

  /// Busy-retry settings
  #[serde(default)]
  pub retry: RetryConfig,

  /// Logging settings
  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Parse and validate a config from TOML text
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load and validate a config file
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// Load a config file, falling back to defaults if it is missing or unusable
  pub fn load_or_default(path: Option<&Path>) -> Self {
    if let Some(path) = path
      && path.exists()
      && let Ok(config) = Self::load(path)
    {
      return config;
    }

    Self::default()
  }

  /// Reject values the coordinator cannot run with
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.retry.max_tries < 1 {
      return Err(ConfigError::Invalid(format!(
        "retry.max_tries must be at least 1, got {}",
        self.retry.max_tries
      )));
    }
    if self.coordinator.queue_capacity == 0 {
      return Err(ConfigError::Invalid(
        "coordinator.queue_capacity must be greater than 0".to_string(),
      ));
    }
    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# gatehouse configuration

# ============================================================================
# Coordinator
# ============================================================================

[coordinator]
# Concurrent reads against the resource (0 = number of CPUs)
reader_pool_size = {pool}

# Inbound operation channel capacity
queue_capacity = {capacity}

# Writes wait this long for in-flight reads to finish
max_wait_for_resource_ms = {resource_ms}

# An open unit of work waits this long for its next message
max_wait_for_work_unit_ms = {unit_ms}

# ============================================================================
# Busy Retry
# ============================================================================

[retry]
# Total attempts per call (>= 1)
max_tries = {tries}
retry_interval_ms = {interval}

# ============================================================================
# Logging
# ============================================================================

[logging]
# off, error, warn, info, debug, trace
log_level = "{level}"
# daily, hourly, never (file logging only)
log_rotation = "{rotation}"
"#,
      pool = defaults.coordinator.reader_pool_size,
      capacity = defaults.coordinator.queue_capacity,
      resource_ms = defaults.coordinator.max_wait_for_resource_ms,
      unit_ms = defaults.coordinator.max_wait_for_work_unit_ms,
      tries = defaults.retry.max_tries,
      interval = defaults.retry.retry_interval_ms,
      level = defaults.logging.log_level,
      rotation = defaults.logging.log_rotation,
    )
  }
}
