//! gatehouse CLI - run the access coordinator against a demo store

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatehouse::Config;

mod commands;
mod kv;
mod logging;

use commands::{DemoOptions, cmd_config, cmd_demo};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Coordinate parallel reads, exclusive writes and units of work against one resource")]
#[command(after_help = "\
QUICK START:
  gatehouse demo                  # Run the demo against an in-memory store
  gatehouse config > gate.toml    # Write the default config
  gatehouse demo --config gate.toml --log-dir ./logs")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run reads, a write and a cancelled unit of work against an in-memory store
  Demo {
    /// Config file (default: built-in defaults)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Reader pool size (overrides the config)
    #[arg(long, value_name = "N")]
    readers: Option<usize>,
    /// Parallel reads to issue before the write
    #[arg(long, default_value = "8")]
    reads: usize,
    /// Write logs to a rolling file in this directory instead of stderr
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Output results as JSON lines
    #[arg(long)]
    json: bool,
  },
  /// Print the default config file
  Config,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Demo {
      config,
      readers,
      reads,
      log_dir,
      json,
    } => {
      let mut config = match config {
        Some(path) => Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
      };
      if let Some(readers) = readers {
        config.coordinator.reader_pool_size = readers;
      }

      let _guard = init_logging(&config.logging, log_dir.as_deref());
      cmd_demo(&config, DemoOptions { reads, json }).await
    }
    Commands::Config => cmd_config(),
  }
}
