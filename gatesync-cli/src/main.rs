//! Gatesync CLI - run gateway syncs and inspect the fee ledger.
//!
//! Usage:
//!   gatesync sync asaas payment --lookback-days 7
//!   gatesync sync pagarme subscription --start-date 2024-03-01 --end-date 2024-03-31
//!   gatesync report tier --lookback-days 30
//!   gatesync tier --as-of 2024-03-15
//!   gatesync migrate
//!   gatesync serve --port 8080
//!
//! Configuration comes from `GATESYNC_*` environment variables. Without
//! `GATESYNC_DATABASE_URL` (and the `database` feature) every command runs
//! against a throwaway in-memory store.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use gatesync::{Config, ConfigBuilder, InMemorySyncStore, SyncStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigBuilder::new().from_env().build()?;
    gatesync::init_tracing_with_config(&config);

    match cli.command {
        Commands::Sync(args) => commands::sync::run(args, &config, cli.json).await?,
        Commands::Report(args) => commands::report::run(args, &config, cli.json).await?,
        Commands::Tier(args) => commands::tier::run(args, &config, cli.json).await?,
        Commands::Migrate(args) => commands::migrate::run(args, &config).await?,
        Commands::Serve(args) => commands::serve::run(args, config).await?,
    }

    Ok(())
}

/// Open the configured store, falling back to memory.
pub async fn open_store(config: &Config) -> Result<Arc<dyn SyncStore>> {
    #[cfg(feature = "database")]
    if let Some(url) = config.database.url.as_deref() {
        let store = gatesync::SeaOrmSyncStore::connect(url).await?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "database"))]
    if config.database.url.is_some() {
        print_warning("GATESYNC_DATABASE_URL is set but this build lacks the `database` feature");
    }

    print_warning("No database configured; results will not outlive this process");
    Ok(Arc::new(InMemorySyncStore::new()))
}

/// Print a value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "→".blue(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}
