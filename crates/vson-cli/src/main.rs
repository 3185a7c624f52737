use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;

use cli::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Scan { timeout, format } => commands::cmd_scan(timeout, format, cli.quiet).await,
        Commands::Read {
            device,
            profile,
            format,
        } => commands::cmd_read(&device, profile, format, cli.quiet, &config).await,
        Commands::Watch { format } => commands::cmd_watch(format, cli.quiet, &config).await,
        Commands::Add {
            address,
            profile,
            alias,
        } => commands::cmd_add(&address, profile, alias, cli.quiet),
    }
}
