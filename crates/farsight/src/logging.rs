//! Logging system setup.
//!
//! Initializes tracing-subscriber with either human-readable or JSON
//! output. `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system with the specified configuration.
///
/// `level_override` and `json_format` come from the command line and win
/// over the configuration file.
pub fn setup_logging(
    config: &LoggingSettings,
    level_override: Option<&str>,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = level_override.unwrap_or(config.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner through the logging system.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║           🔭 FARSIGHT SERVER 🔭          ║");
    info!("║                 v{}                  ║", version);
    info!("║                                          ║");
    info!("║  Interest-Managed World Streaming        ║");
    info!("║  with Proof-of-Work Login                ║");
    info!("╚══════════════════════════════════════════╝");
}
