//! Environment expansion and content fingerprinting for config files.

use std::borrow::Cow;
use std::fmt;

use sha2::{Digest, Sha256};

/// Expands `$VAR` and `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string, so a file referencing a
/// missing variable still loads (and is then up to validation to reject).
pub fn expand_env(content: &str) -> Cow<'_, str> {
    shellexpand::env_with_context_no_errors(content, |name| {
        Some(std::env::var(name).unwrap_or_default())
    })
}

/// Content hash of an expanded config file.
///
/// Used only to tell whether a file changed between reloads; it makes no
/// integrity claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints the given bytes (hex-encoded SHA-256).
    pub fn of(content: &[u8]) -> Self {
        Fingerprint(hex::encode(Sha256::digest(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
