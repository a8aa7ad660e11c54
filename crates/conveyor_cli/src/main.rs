//! Conveyor CLI - schema management and sync status for the conveyor
//! service.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version)]
#[command(about = "Durable-queue sync service between GitHub and Jira")]
#[command(
    long_about = "Conveyor synchronizes development data from GitHub installations \
into Jira sites by consuming jobs from a durable message queue and driving \
resumable backfills. This CLI manages the database schema and reports \
subscription sync progress."
)]
#[command(after_long_help = r#"CONFIGURATION
    Conveyor reads configuration from:
      1. Environment variables (CONVEYOR_* prefix, e.g., CONVEYOR_DATABASE_URL)
      2. ~/.config/conveyor/config.toml (or $XDG_CONFIG_HOME/conveyor/config.toml)
      3. ./conveyor.toml
      4. .env file in the current directory

ENVIRONMENT VARIABLES
    CONVEYOR_DATABASE_URL     Database connection string
                              (default: ~/.local/state/conveyor/conveyor.db)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Show subscription sync status
    Status,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conveyor=info,conveyor_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = config::Config::load();
    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .expect("Failed to determine database URL - this should not happen");

    // Ensure the database directory exists for SQLite.
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations.
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Status => {
            commands::status::handle_status(&database_url).await?;
        }
    }

    Ok(())
}
