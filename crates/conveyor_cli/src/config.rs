//! Configuration file support for the conveyor CLI.
//!
//! Configuration is loaded with the following precedence (highest to
//! lowest):
//! 1. Environment variables (prefixed with `CONVEYOR_`, e.g.,
//!    `CONVEYOR_DATABASE_URL`)
//! 2. Config file (~/.config/conveyor/config.toml or ./conveyor.toml)
//! 3. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/conveyor/conveyor.db`
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "postgres:///conveyor"  # optional
//!
//! [app]
//! app_id = 12345
//! client_id = "Iv1.abcdef"
//! base_url = "https://github.com"
//! api_url = "https://api.github.com"
//! ```

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Cloud app registration.
    pub app: AppConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL. Supports sqlite:// and postgres://
    /// schemes. Defaults to a SQLite file in the XDG state directory.
    pub url: Option<String>,
}

/// The cloud app registration embedded in backfill jobs.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_id: i64,
    pub client_id: String,
    pub base_url: String,
    pub api_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: 0,
            client_id: String::new(),
            base_url: "https://github.com".to_string(),
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment.
    ///
    /// Errors while reading are logged and fall back to defaults so a
    /// broken config file never prevents `--help` from working.
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(dirs) = ProjectDirs::from("", "", "conveyor") {
            let path = dirs.config_dir().join("config.toml");
            builder = builder.add_source(
                File::from(path).format(FileFormat::Toml).required(false),
            );
        }
        builder = builder
            .add_source(
                File::new("conveyor.toml", FileFormat::Toml).required(false),
            )
            .add_source(Environment::with_prefix("CONVEYOR").separator("_"));

        match builder.build().and_then(|c| c.try_deserialize()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load configuration, using defaults");
                Self::default()
            }
        }
    }

    /// The database URL, falling back to a SQLite file under the XDG
    /// state directory.
    pub fn database_url(&self) -> Option<String> {
        if let Some(url) = &self.database.url {
            return Some(url.clone());
        }

        let dirs = ProjectDirs::from("", "", "conveyor")?;
        let state_dir = dirs
            .state_dir()
            .map(|d| d.to_path_buf())
            .unwrap_or_else(|| dirs.data_dir().to_path_buf());
        Some(format!(
            "sqlite://{}?mode=rwc",
            state_dir.join("conveyor.db").display()
        ))
    }
}
