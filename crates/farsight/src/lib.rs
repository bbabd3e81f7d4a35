//! # Farsight Server - Main Entry Point
//!
//! Entry point for the Farsight demo server: CLI parsing, configuration
//! loading, logging setup, and application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! farsight
//!
//! # Specify custom configuration
//! farsight --config production.toml
//!
//! # Override specific settings
//! farsight --ticks 500 --entities 1000 --log-level debug
//!
//! # JSON logging for production
//! farsight --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default:
//! `config.toml`). If the file doesn't exist, a default configuration will
//! be created.
//!
//! ## Signal Handling
//!
//! The demo loop shuts down on SIGINT (Ctrl+C) and SIGTERM.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the Farsight server.
///
/// Handles the complete application lifecycle:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Demo login and world loop execution
///
/// Called from an async context (`main` carries `#[tokio::main]`), so it
/// must not carry the attribute itself.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.log_level.as_deref(), args.json_logs)
    {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(&args, config) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {e:?}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export configuration types for potential library usage.
pub use config::{AppConfig as ServerAppConfig, DemoSettings, LoggingSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aoi.packet_size, 1400);
        assert_eq!(config.login.num_requests, 10);
    }

    #[test]
    fn test_cli_structure() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            log_level: Some("debug".to_string()),
            json_logs: true,
            ticks: Some(50),
            entities: Some(10),
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
        assert_eq!(args.ticks, Some(50));
    }

    #[test]
    fn test_cli_overrides_apply() {
        let args = CliArgs {
            config_path: PathBuf::from("unused.toml"),
            log_level: None,
            json_logs: false,
            ticks: Some(7),
            entities: Some(3),
        };
        let app = Application::new(&args, AppConfig::default()).unwrap();
        // Application holds the merged configuration; a zero entity count
        // must still be rejected.
        drop(app);

        let bad = CliArgs {
            entities: Some(0),
            ..args
        };
        assert!(Application::new(&bad, AppConfig::default()).is_err());
    }
}
