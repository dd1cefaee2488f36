//! Hot-reloaded bot configuration.
//!
//! Each bot defines its own configuration document type and implements
//! [`ConfigDocument`] for it. The [`ConfigAgent`] keeps an immutable
//! [`ConfigSnapshot`] of that document in sync with a YAML file on disk:
//!
//! 1. The file is read and `${VAR}` references are expanded from the process
//!    environment.
//! 2. The expanded bytes are fingerprinted. An unchanged fingerprint ends the
//!    reload without parsing anything.
//! 3. The content is parsed into a fresh document, defaulted, and validated.
//! 4. Only a fully valid document is published, replacing the previous
//!    snapshot as a whole. A bad file leaves the last good snapshot in place.
//!
//! # Example
//!
//! ```no_run
//! use robot_runtime::config::{ConfigAgent, ConfigDocument, ValidationError, DEFAULT_RELOAD_INTERVAL};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Default, Deserialize)]
//! struct BotConfig {
//!     #[serde(default)]
//!     repos: Vec<String>,
//! }
//!
//! impl ConfigDocument for BotConfig {
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         if self.repos.is_empty() {
//!             return Err(ValidationError::new("repos must not be empty"));
//!         }
//!         Ok(())
//!     }
//!
//!     fn set_default(&mut self) {}
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = ConfigAgent::<BotConfig>::start("/etc/bot/config.yaml", DEFAULT_RELOAD_INTERVAL).await?;
//! let snapshot = agent.get_config();
//! println!("{} repos", snapshot.document().repos.len());
//! agent.stop().await;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod agent;
pub mod content;
pub mod repo_filter;

pub use agent::{AgentState, ConfigAgent, ConfigSnapshot, DEFAULT_RELOAD_INTERVAL, ReloadOutcome};
pub use content::{Fingerprint, expand_env};
pub use repo_filter::{FilterMatch, RepoFilter, RepoScoped, find_config};

/// Capabilities the agent needs from a bot's configuration document.
///
/// `Default` is the constructor of a fresh, empty document: it is what an
/// empty file parses to, and `#[serde(default)]` fields fall back to it.
/// The agent never looks inside the document beyond these calls.
pub trait ConfigDocument: DeserializeOwned + Default + Send + Sync + 'static {
    /// Checks the document for semantic consistency.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Fills fields the file left unset.
    fn set_default(&mut self);
}

/// A configuration document that parsed but is not semantically valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read (missing, unreadable, not UTF-8).
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not a well-formed document of the expected shape.
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// The document parsed but failed validation.
    #[error("invalid config in {}: {source}", path.display())]
    Validation {
        path: PathBuf,
        source: ValidationError,
    },
}
