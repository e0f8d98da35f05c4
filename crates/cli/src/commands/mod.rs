//! CLI command implementations

mod config;
mod demo;

pub use config::cmd_config;
pub use demo::{DemoOptions, cmd_demo};
