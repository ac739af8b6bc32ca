//! sitehook CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sitehook")]
#[command(about = "sitehook deployment CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a deployment configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "sitehook.kdl")]
        path: PathBuf,
    },
    /// Run one build of a target in the foreground
    Build {
        /// Path to the configuration file
        path: PathBuf,
        /// Target to build
        target: String,
        /// Build the last synced checkout when upstream cannot be fetched
        #[arg(long)]
        ignore_pull_error: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let ok = match cli.command {
        Commands::Validate { path } => commands::validate(&path)?,
        Commands::Build {
            path,
            target,
            ignore_pull_error,
        } => commands::build(&path, &target, ignore_pull_error).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
