//! Check-config command implementation.

use colored::Colorize;
use rfd_harness::{HarnessConfig, ProcessEnv};

/// Validate the environment and print the resolved configuration.
pub fn execute() -> anyhow::Result<i32> {
    match HarnessConfig::from_env(&ProcessEnv) {
        Ok(config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {}", "Invalid configuration:".red().bold(), e);
            Ok(1)
        }
    }
}
