//! Command-line interface for the Farsight demo server.
//!
//! Argument parsing lives here, using `clap`. CLI options override
//! whatever the configuration file says.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file.
    pub config_path: PathBuf,
    /// Optional override for the log level.
    pub log_level: Option<String>,
    /// Whether to force JSON log output.
    pub json_logs: bool,
    /// Optional override for the number of demo ticks to run.
    pub ticks: Option<u32>,
    /// Optional override for the number of simulated entities.
    pub entities: Option<u32>,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        let matches = Command::new("Farsight Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Interest-managed world streaming over a two-phase login")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("ticks")
                    .short('t')
                    .long("ticks")
                    .value_name("COUNT")
                    .value_parser(clap::value_parser!(u32))
                    .help("Number of demo ticks to run before exiting"),
            )
            .arg(
                Arg::new("entities")
                    .short('e')
                    .long("entities")
                    .value_name("COUNT")
                    .value_parser(clap::value_parser!(u32))
                    .help("Number of simulated entities in the demo world"),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("config.toml"),
            ),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            ticks: matches.get_one::<u32>("ticks").copied(),
            entities: matches.get_one::<u32>("entities").copied(),
        }
    }
}
