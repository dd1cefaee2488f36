//! Process options shared by every bot built on the runtime.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Longest accepted reload interval: one day.
pub const MAX_RELOAD_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("--config-file must not be empty")]
    EmptyConfigFile,

    #[error("--reload-interval-secs must be greater than zero")]
    ZeroReloadInterval,

    #[error("--reload-interval-secs must be at most {MAX_RELOAD_INTERVAL_SECS}")]
    ReloadIntervalTooLong,

    #[error("--secret-file must not be empty")]
    EmptySecretFile,
}

/// Command line options for a bot process.
#[derive(Parser, Debug, Clone)]
#[command(name = "robot-runtime", about = "Webhook-driven bot runtime")]
pub struct ServiceOptions {
    /// Port to listen on for webhook deliveries.
    #[arg(long, env = "ROBOT_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Path to the bot's YAML configuration file.
    #[arg(long, env = "ROBOT_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Seconds to wait for in-flight handlers on shutdown.
    #[arg(long, env = "ROBOT_GRACE_PERIOD_SECS", default_value_t = 180)]
    pub grace_period_secs: u64,

    /// Seconds between config file reload checks.
    #[arg(long, env = "ROBOT_RELOAD_INTERVAL_SECS", default_value_t = 60)]
    pub reload_interval_secs: u64,

    /// Secret file to load and watch. May be repeated.
    #[arg(long = "secret-file")]
    pub secret_files: Vec<PathBuf>,
}

impl ServiceOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.config_file.as_os_str().is_empty() {
            return Err(OptionsError::EmptyConfigFile);
        }
        if self.reload_interval_secs == 0 {
            return Err(OptionsError::ZeroReloadInterval);
        }
        if self.reload_interval_secs > MAX_RELOAD_INTERVAL_SECS {
            return Err(OptionsError::ReloadIntervalTooLong);
        }
        if self.secret_files.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(OptionsError::EmptySecretFile);
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}
