//! esync CLI - Command-line interface for esync
//!
//! Provides commands for:
//! - Running a sync from the source store to the destination store
//! - Inspecting persisted jobs
//! - Managing the configuration file
//! - Generating shell completions

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use esync_core::config::{Config, LoggingConfig};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::{
    completions::CompletionsCommand, config::ConfigCommand, jobs::JobsCommand,
    status::StatusCommand, sync::SyncCommand,
};
use context::CliContext;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "esync",
    version,
    about = "Copy an Egnyte folder tree into a SharePoint document library"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize the source tree into the destination
    Sync(SyncCommand),
    /// Show a persisted sync job
    Status(StatusCommand),
    /// List recent sync jobs
    Jobs(JobsCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// `-v`/`-q` win over the configured level; `RUST_LOG` wins over both
fn log_level(verbose: u8, quiet: bool, configured: &str) -> String {
    match (quiet, verbose) {
        (true, _) => "warn".to_string(),
        (false, 0) => configured.to_string(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    }
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    let level = log_level(cli.verbose, cli.quiet, &logging.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext::new(format, cli.quiet, cli.config.clone());

    // A broken config file is reported by the command itself
    let logging = ctx
        .load_config()
        .map(|config| config.logging)
        .unwrap_or_else(|_| Config::default().logging);
    init_tracing(&cli, &logging);

    match &cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Jobs(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(),
    }
}
