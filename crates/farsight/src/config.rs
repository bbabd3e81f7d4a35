//! Application configuration loading and validation.
//!
//! Configuration is a single TOML file with sections for logging, the demo
//! world, the AoI subsystem and the login pipeline. A missing file is not
//! an error: defaults are used and a commented default file is written so
//! the next run has something to edit.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use farsight_aoi::AoiConfig;
use farsight_connection::{ChallengeConfig, LoginConfig};

/// Logging configuration from the `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default log level when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Demo world parameters from the `[demo]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Ticks to run before the demo exits on its own.
    pub ticks: u32,
    /// Simulated entities wandering the demo world.
    pub entities: u32,
    /// Seed for entity placement and movement.
    pub seed: u64,
    /// Simulated client downstream cap in bits per second.
    pub client_bps: u32,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            ticks: 100,
            entities: 200,
            seed: 1,
            client_bps: 112_000,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingSettings,
    pub demo: DemoSettings,
    pub aoi: AoiConfig,
    pub login: LoginConfig,
    pub challenge: ChallengeConfig,
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Loads configuration from `path`, creating a default file if none
    /// exists yet.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            let rendered = toml::to_string_pretty(&config)
                .context("failed to serialize default configuration")?;
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("failed to write default config to {}", path.display()))?;
            info!(path = %path.display(), "wrote default configuration file");
            return Ok(config);
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("invalid TOML in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "invalid log level '{}', expected one of {:?}",
                self.logging.level,
                LOG_LEVELS
            );
        }
        if self.demo.entities == 0 {
            bail!("demo.entities must be at least 1");
        }
        if self.aoi.default_radius <= 0.0 {
            bail!("aoi.default_radius must be positive");
        }
        if self.aoi.default_hysteresis < 0.0 {
            bail!("aoi.default_hysteresis must not be negative");
        }
        if self.aoi.ticks_per_second == 0 {
            bail!("aoi.ticks_per_second must be at least 1");
        }
        if self.login.num_requests == 0 {
            bail!("login.num_requests must be at least 1");
        }
        if self.login.timeout_secs <= 0.0 || self.login.retry_interval_secs <= 0.0 {
            bail!("login timeout and retry interval must be positive");
        }
        if !self.challenge.challenge_type.is_empty()
            && !["cuckoo_cycle", "delay", "fail"].contains(&self.challenge.challenge_type.as_str())
        {
            bail!(
                "unknown challenge.challenge_type '{}'",
                self.challenge.challenge_type
            );
        }
        Ok(())
    }
}
