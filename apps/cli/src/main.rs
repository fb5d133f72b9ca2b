//! rfd-driver - entrypoint for containerized RFdiffusion design jobs
//!
//! With no subcommand it runs the job described by the container environment.
//! The other subcommands inspect configuration and workload logs offline.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// RFdiffusion job driver
///
/// Acquires model weights, stages inputs, runs RFdiffusion, uploads results,
/// and reports progress to the control plane.
#[derive(Parser, Debug)]
#[command(name = "rfd-driver", author, version, about = "RFdiffusion job driver")]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the job configured through the environment (default)
    Run,

    /// Validate the environment and print the resolved configuration as JSON
    ///
    /// The API token is redacted. Exits 1 when the configuration is invalid.
    CheckConfig,

    /// Replay a workload log and print the progress updates it would produce
    Classify {
        /// Path to a captured RFdiffusion log
        log: PathBuf,

        /// Number of diffusion steps the run was configured with
        #[arg(long)]
        steps: Option<u32>,

        /// Print each update as a JSON status body
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(log_level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    let code = match args.command.unwrap_or(Command::Run) {
        Command::Run => commands::run::execute().await,
        Command::CheckConfig => commands::check_config::execute()?,
        Command::Classify { log, steps, json } => commands::classify::execute(&log, steps, json)?,
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
