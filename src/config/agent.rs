//! The configuration agent: one writer, many non-blocking readers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, error, info};

use super::content::{Fingerprint, expand_env};
use super::{ConfigDocument, LoadError};
use crate::periodic::PeriodicTask;

/// Reload interval used by the bots unless told otherwise.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// One generation of configuration: a document and the fingerprint of the
/// file content it was parsed from.
///
/// Snapshots are immutable. The agent replaces the whole `Arc` on reload, so
/// a reader holding a snapshot always sees a document and fingerprint from
/// the same load.
pub struct ConfigSnapshot<C> {
    document: C,
    fingerprint: Fingerprint,
}

impl<C> ConfigSnapshot<C> {
    pub fn document(&self) -> &C {
        &self.document
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl<C: fmt::Debug> fmt::Debug for ConfigSnapshot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSnapshot")
            .field("fingerprint", &self.fingerprint.short())
            .field("document", &self.document)
            .finish()
    }
}

/// What a reload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The file content matched the published fingerprint; nothing was parsed.
    Unchanged,
    /// A new snapshot was published.
    Updated,
}

/// Lifecycle of a started agent.
///
/// An agent whose first load fails is never constructed, so there is no
/// value for the uninitialized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Running,
    Stopped,
}

/// State shared between agent handles and the reload task.
struct Shared<C> {
    path: PathBuf,

    /// The published snapshot. Readers load it without blocking; a reload
    /// swaps in a whole new `Arc` once parsing and validation are done.
    current: ArcSwap<ConfigSnapshot<C>>,

    /// Serializes reloads so a manual reload cannot interleave with a tick.
    writer: Mutex<()>,
}

impl<C: ConfigDocument> Shared<C> {
    fn snapshot(&self) -> Arc<ConfigSnapshot<C>> {
        self.current.load_full()
    }

    async fn reload(&self) -> Result<ReloadOutcome, LoadError> {
        let _writer = self.writer.lock().await;

        let published = self.snapshot();
        let (content, fingerprint) = read_expanded(&self.path).await?;
        if fingerprint == published.fingerprint {
            debug!(path = %self.path.display(), "Config unchanged");
            return Ok(ReloadOutcome::Unchanged);
        }

        let snapshot = parse_snapshot::<C>(&self.path, &content, fingerprint)?;
        info!(
            path = %self.path.display(),
            fingerprint = %snapshot.fingerprint.short(),
            previous = %published.fingerprint.short(),
            "Config reloaded"
        );
        self.current.store(Arc::new(snapshot));
        Ok(ReloadOutcome::Updated)
    }
}

/// Keeps a [`ConfigSnapshot`] in sync with a file.
///
/// `ConfigAgent` is a cheap handle: clones share the same snapshot and reload
/// task, so the dispatcher and bot code can each hold one.
pub struct ConfigAgent<C> {
    shared: Arc<Shared<C>>,
    reloader: Arc<PeriodicTask>,
}

impl<C> Clone for ConfigAgent<C> {
    fn clone(&self) -> Self {
        ConfigAgent {
            shared: Arc::clone(&self.shared),
            reloader: Arc::clone(&self.reloader),
        }
    }
}

impl<C: ConfigDocument> ConfigAgent<C> {
    /// Loads the file once and starts reloading it every `interval`.
    ///
    /// A failed first load is returned to the caller: there is no valid
    /// configuration to serve, so the service should not start. Failures on
    /// later reloads are logged and the previous snapshot is kept.
    pub async fn start(path: impl Into<PathBuf>, interval: Duration) -> Result<Self, LoadError> {
        let path = path.into();
        let (content, fingerprint) = read_expanded(&path).await?;
        let snapshot = parse_snapshot::<C>(&path, &content, fingerprint)?;

        info!(
            path = %path.display(),
            fingerprint = %snapshot.fingerprint.short(),
            "Config loaded"
        );

        let shared = Arc::new(Shared {
            path,
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        });

        let for_task = Arc::clone(&shared);
        // Background reloads log in the context of whoever started the agent.
        let span = Span::current();
        let reloader = PeriodicTask::start(
            move || {
                let shared = Arc::clone(&for_task);
                async move {
                    if let Err(e) = shared.reload().await {
                        error!(path = %shared.path.display(), error = %e, "Failed to reload config");
                    }
                }
                .instrument(span.clone())
            },
            interval,
            // The file was just loaded; the first tick is one interval out.
            interval,
        );

        Ok(ConfigAgent {
            shared,
            reloader: Arc::new(reloader),
        })
    }

    /// Returns the current snapshot.
    ///
    /// Only loads an `Arc`, so it never waits on a reload
    /// that is still reading or validating the file.
    pub fn get_config(&self) -> Arc<ConfigSnapshot<C>> {
        self.shared.snapshot()
    }

    /// Reloads the file now, outside the regular schedule.
    ///
    /// Errors are returned rather than logged; the published snapshot is left
    /// untouched on any error.
    pub async fn reload(&self) -> Result<ReloadOutcome, LoadError> {
        self.shared.reload().await
    }

    /// Stops background reloading and waits for the reload task to exit.
    ///
    /// The last snapshot stays readable. Stopping twice is harmless.
    pub async fn stop(&self) {
        self.reloader.stop().await;
        info!(path = %self.shared.path.display(), "Config agent stopped");
    }

    pub fn state(&self) -> AgentState {
        if self.reloader.is_running() {
            AgentState::Running
        } else {
            AgentState::Stopped
        }
    }

    /// The file this agent watches.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

/// Reads the file, expands the environment into it, and fingerprints the result.
async fn read_expanded(path: &Path) -> Result<(String, Fingerprint), LoadError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let content = expand_env(&raw).into_owned();
    let fingerprint = Fingerprint::of(content.as_bytes());
    Ok((content, fingerprint))
}

/// Parses, defaults and validates expanded content into a snapshot.
fn parse_snapshot<C: ConfigDocument>(
    path: &Path,
    content: &str,
    fingerprint: Fingerprint,
) -> Result<ConfigSnapshot<C>, LoadError> {
    let mut document = parse_document::<C>(content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    document.set_default();
    document
        .validate()
        .map_err(|source| LoadError::Validation {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(ConfigSnapshot {
        document,
        fingerprint,
    })
}

/// Parses YAML into a fresh document; blank content is the empty document.
fn parse_document<C: ConfigDocument>(content: &str) -> Result<C, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(C::default());
    }
    serde_yaml::from_str(content)
}
