//! Classify command implementation.

use anyhow::Context;
use colored::Colorize;
use rfd_harness::config::DEFAULT_TOTAL_STEPS;
use rfd_harness::ProgressTranslator;
use std::path::Path;

/// Replay `log` through the RFdiffusion progress translator.
///
/// Prints one line per update, either human-readable or as the JSON body the
/// control plane would receive.
pub fn execute(log: &Path, steps: Option<u32>, json_output: bool) -> anyhow::Result<i32> {
    let bytes = std::fs::read(log).with_context(|| format!("Failed to read {}", log.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let translator = ProgressTranslator::rfdiffusion(steps.unwrap_or(DEFAULT_TOTAL_STEPS));

    let mut count = 0usize;
    for (number, line) in content.lines().enumerate() {
        let Some(update) = translator.translate(line) else {
            continue;
        };
        count += 1;

        if json_output {
            println!("{}", serde_json::to_string(&update)?);
        } else {
            println!(
                "{:>5}  {}  {}",
                format!("{}", number + 1).dimmed(),
                format!("{:>3}%", update.progress).green(),
                update.message
            );
        }
    }

    if !json_output {
        println!();
        println!("{} updates from {} lines", count.to_string().bold(), content.lines().count());
    }
    Ok(0)
}
