//! Tandem CLI - administrative interface for tandem
//!
//! Provides commands for:
//! - Binding local directories to remote folders and removing bindings
//! - Viewing per-configuration sync status
//! - Reading the sync log and the pending-upload queue
//!
//! The CLI only talks to the state database; the engine runs elsewhere.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use tandem_core::config::{Config, LoggingConfig};
use tandem_core::logging;
use tandem_core::paths::expand_tilde;

mod commands;
mod output;

use commands::{
    add::AddCommand, list::ListCommand, logs::LogsCommand, pending::PendingCommand,
    remove::RemoveCommand, status::StatusCommand, Session,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "tandem", version, about = "Bidirectional folder sync")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Use alternate state database
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Bind a local directory to a remote folder
    Add(AddCommand),
    /// Remove the binding of a local directory
    Remove(RemoveCommand),
    /// List sync configurations
    List(ListCommand),
    /// Show item counts per configuration
    Status(StatusCommand),
    /// Show the most recent sync log entries
    Logs(LogsCommand),
    /// Show files waiting to be uploaded
    Pending(PendingCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let logging_config = LoggingConfig {
        level: logging::level_for_verbosity(&config.logging.level, cli.verbose),
        format: config.logging.format.clone(),
    };
    // A subscriber installed by the environment is fine
    let _ = logging::init(&logging_config);
    debug!(config_path = %config_path.display(), "Loaded configuration");

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let db_path = cli
        .db
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| database_path(&config));
    let session = Session::open(&db_path).await?;

    let result = match &cli.command {
        Commands::Add(cmd) => cmd.execute(&session, format).await,
        Commands::Remove(cmd) => cmd.execute(&session, format).await,
        Commands::List(cmd) => cmd.execute(&session, format).await,
        Commands::Status(cmd) => cmd.execute(&session, format).await,
        Commands::Logs(cmd) => cmd.execute(&session, format).await,
        Commands::Pending(cmd) => cmd.execute(&session, format).await,
    };

    session.close().await;
    result
}

/// Configured database path with `~` expanded
fn database_path(config: &Config) -> PathBuf {
    expand_tilde(&config.database.path.to_string_lossy())
}
