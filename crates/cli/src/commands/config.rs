//! Config command

use anyhow::Result;
use gatehouse::Config;

/// Print the default config file
pub fn cmd_config() -> Result<()> {
  print!("{}", Config::generate_template());
  Ok(())
}
