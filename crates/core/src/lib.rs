//! Shared configuration for the gatehouse coordinator and its binaries.

pub mod config;

pub use config::{Config, ConfigError, CoordinatorConfig, LoggingConfig, RetryConfig};
