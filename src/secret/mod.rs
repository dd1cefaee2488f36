//! Secret files kept in memory and refreshed when they change.
//!
//! Bots read API tokens from mounted secret files. The [`SecretAgent`] loads
//! each file once (a failure is fatal), then polls it every second and
//! re-reads it when its modification time moves forward. After 600
//! unchanged checks the file is re-read anyway, in case the platform swapped
//! it without touching the mtime.
//!
//! Values are trimmed of surrounding whitespace. The same [`SecretStore`]
//! can back a [`CensoringMakeWriter`] so secret values never reach the logs.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::periodic::PeriodicTask;

pub mod censor;

pub use censor::{CENSORED, CensoringMakeWriter};

/// How often each secret file is checked.
pub const SECRET_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Unchanged checks after which a secret file is re-read regardless.
pub const FORCED_RELOAD_AFTER: u32 = 600;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to read secret file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Shared map from secret file path to its current value.
#[derive(Clone, Default)]
pub struct SecretStore {
    values: Arc<RwLock<HashMap<PathBuf, Arc<[u8]>>>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of the secret loaded from `path`.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<[u8]>> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .cloned()
    }

    pub(crate) fn set(&self, path: impl Into<PathBuf>, value: Vec<u8>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), value.into());
    }

    /// Replaces every occurrence of any secret in `content` with `CENSORED`.
    pub fn censor<'c>(&self, content: &'c [u8]) -> Cow<'c, [u8]> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut secrets: Vec<&[u8]> = values.values().map(|v| &**v).collect();
        censor::censor_all(content, &mut secrets)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SecretStore")
            .field("paths", &values.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Polling cadence of a [`SecretAgent`].
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub interval: Duration,
    pub forced_reload_after: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        WatchSettings {
            interval: SECRET_CHECK_INTERVAL,
            forced_reload_after: FORCED_RELOAD_AFTER,
        }
    }
}

/// Loads secret files and keeps them current.
pub struct SecretAgent {
    store: SecretStore,
    settings: WatchSettings,
    watchers: tokio::sync::Mutex<HashMap<PathBuf, PeriodicTask>>,
}

impl SecretAgent {
    /// Loads every file into a fresh store and starts watching them.
    pub async fn start<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, SecretError> {
        Self::start_with(SecretStore::new(), paths, WatchSettings::default()).await
    }

    /// Loads every file into `store` and starts watching them.
    ///
    /// Nothing is watched unless every file loads.
    pub async fn start_with<P: Into<PathBuf>>(
        store: SecretStore,
        paths: impl IntoIterator<Item = P>,
        settings: WatchSettings,
    ) -> Result<Self, SecretError> {
        let mut loaded = Vec::new();
        for path in paths {
            let path = path.into();
            let value = load_secret(&path).await?;
            loaded.push((path, value));
        }

        let mut watchers = HashMap::with_capacity(loaded.len());
        for (path, value) in loaded {
            store.set(path.clone(), value);
            info!(path = %path.display(), "Secret loaded");
            watchers
                .entry(path.clone())
                .or_insert_with(|| watch(path, store.clone(), settings));
        }

        Ok(SecretAgent {
            store,
            settings,
            watchers: tokio::sync::Mutex::new(watchers),
        })
    }

    /// Loads one more file and starts watching it.
    ///
    /// A file that is already watched is left alone. A file that fails to
    /// load is not watched and its error is returned.
    pub async fn add(&self, path: impl Into<PathBuf>) -> Result<(), SecretError> {
        let path = path.into();
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(&path) {
            return Ok(());
        }

        let value = load_secret(&path).await?;
        self.store.set(path.clone(), value);
        info!(path = %path.display(), "Secret added");
        watchers.insert(path.clone(), watch(path, self.store.clone(), self.settings));
        Ok(())
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// Returns the current value of the secret loaded from `path`.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<[u8]>> {
        self.store.get(path)
    }

    /// Returns a closure yielding the latest value of one secret, for clients
    /// that fetch their token on every request. Yields an empty value for a
    /// path the agent never loaded.
    pub fn token_fn(&self, path: impl Into<PathBuf>) -> impl Fn() -> Arc<[u8]> + Send + Sync + 'static {
        let store = self.store.clone();
        let path = path.into();
        move || store.get(&path).unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn censor<'c>(&self, content: &'c [u8]) -> Cow<'c, [u8]> {
        self.store.censor(content)
    }

    /// Stops watching. The last loaded values remain readable.
    pub async fn stop(&self) {
        let watchers = self.watchers.lock().await;
        for watcher in watchers.values() {
            watcher.stop().await;
        }
        debug!(files = watchers.len(), "Secret agent stopped");
    }
}

/// Reads a secret file and trims surrounding whitespace.
async fn load_secret(path: &Path) -> Result<Vec<u8>, SecretError> {
    let raw = tokio::fs::read(path).await.map_err(|source| SecretError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw.trim_ascii().to_vec())
}

/// Per-file polling state. Checks never overlap, so the lock is uncontended.
struct SecretWatch {
    path: PathBuf,
    store: SecretStore,
    forced_reload_after: u32,
    skips: u32,
    last_modified: Option<SystemTime>,
}

impl SecretWatch {
    async fn check(&mut self) {
        if self.skips < self.forced_reload_after {
            let modified = match tokio::fs::metadata(&self.path)
                .await
                .and_then(|m| m.modified())
            {
                Ok(modified) => modified,
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "Failed to stat secret file");
                    return;
                }
            };

            if self.last_modified.is_some_and(|last| modified <= last) {
                self.skips += 1;
                return;
            }
            self.last_modified = Some(modified);
        }

        match load_secret(&self.path).await {
            Ok(value) => {
                self.store.set(self.path.clone(), value);
                self.skips = 0;
                debug!(path = %self.path.display(), "Secret reloaded");
            }
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to reload secret"),
        }
    }
}

fn watch(path: PathBuf, store: SecretStore, settings: WatchSettings) -> PeriodicTask {
    let state = Arc::new(tokio::sync::Mutex::new(SecretWatch {
        path,
        store,
        forced_reload_after: settings.forced_reload_after,
        skips: 0,
        last_modified: None,
    }));

    PeriodicTask::start(
        move || {
            let state = Arc::clone(&state);
            async move { state.lock().await.check().await }
        },
        settings.interval,
        settings.interval,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn fast(forced_reload_after: u32) -> WatchSettings {
        WatchSettings {
            interval: Duration::from_millis(10),
            forced_reload_after,
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn start_loads_trimmed_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  s3cr3t\n").unwrap();

        let agent = SecretAgent::start([&path]).await.unwrap();
        assert_eq!(agent.get(&path).as_deref(), Some(&b"s3cr3t"[..]));
        assert_eq!(&*agent.token_fn(&path)(), b"s3cr3t");
        assert!(agent.get(dir.path().join("other")).is_none());

        agent.stop().await;
    }

    #[tokio::test]
    async fn start_fails_if_any_file_is_missing() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("token");
        std::fs::write(&good, "value").unwrap();

        let result = SecretAgent::start([good, dir.path().join("absent")]).await;
        assert!(matches!(result, Err(SecretError::Read { .. })));
    }

    #[tokio::test]
    async fn modified_file_is_reloaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "old").unwrap();

        let agent = SecretAgent::start_with(SecretStore::new(), [&path], fast(FORCED_RELOAD_AFTER))
            .await
            .unwrap();
        let token = agent.token_fn(&path);

        // Ensure the new mtime is strictly later on coarse-grained filesystems.
        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(&path, "new").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        eventually(|| &*token() == b"new").await;
        agent.stop().await;
    }

    #[tokio::test]
    async fn unchanged_mtime_is_reread_after_forced_interval() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "old").unwrap();
        let pinned = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        File::options().write(true).open(&path).unwrap().set_modified(pinned).unwrap();

        let agent = SecretAgent::start_with(SecretStore::new(), [&path], fast(3))
            .await
            .unwrap();

        // Let the first check record the pinned mtime.
        tokio::time::sleep(Duration::from_millis(30)).await;

        std::fs::write(&path, "rotated").unwrap();
        File::options().write(true).open(&path).unwrap().set_modified(pinned).unwrap();

        eventually(|| agent.get(&path).as_deref() == Some(&b"rotated"[..])).await;
        agent.stop().await;
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "keep-me").unwrap();

        let agent = SecretAgent::start_with(SecretStore::new(), [&path], fast(1))
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(agent.get(&path).as_deref(), Some(&b"keep-me"[..]));
        agent.stop().await;
    }

    #[tokio::test]
    async fn add_loads_and_watches_another_file() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("token");
        let second = dir.path().join("webhook-secret");
        std::fs::write(&first, "one").unwrap();
        std::fs::write(&second, "two\n").unwrap();

        let agent = SecretAgent::start_with(SecretStore::new(), [&first], fast(FORCED_RELOAD_AFTER))
            .await
            .unwrap();
        assert!(agent.get(&second).is_none());

        agent.add(&second).await.unwrap();
        assert_eq!(agent.get(&second).as_deref(), Some(&b"two"[..]));
        // Adding the same file again changes nothing.
        agent.add(&second).await.unwrap();
        assert_eq!(agent.watchers.lock().await.len(), 2);

        std::fs::write(&second, "rotated").unwrap();
        File::options()
            .write(true)
            .open(&second)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        eventually(|| agent.get(&second).as_deref() == Some(&b"rotated"[..])).await;

        agent.stop().await;
    }

    #[tokio::test]
    async fn add_of_a_missing_file_fails_and_watches_nothing() {
        let dir = tempdir().unwrap();
        let agent = SecretAgent::start(Vec::<PathBuf>::new()).await.unwrap();

        let result = agent.add(dir.path().join("absent")).await;
        assert!(matches!(result, Err(SecretError::Read { .. })));
        assert!(agent.watchers.lock().await.is_empty());

        agent.stop().await;
    }

    #[tokio::test]
    async fn censor_replaces_every_loaded_secret() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "alpha-token").unwrap();
        std::fs::write(&b, "beta-token\n").unwrap();

        let agent = SecretAgent::start([&a, &b]).await.unwrap();
        let out = agent.censor(b"a=alpha-token b=beta-token c=gamma");
        assert_eq!(&*out, b"a=CENSORED b=CENSORED c=gamma");

        let untouched = agent.censor(b"nothing secret");
        assert!(matches!(untouched, Cow::Borrowed(_)));

        agent.stop().await;
    }

    #[tokio::test]
    async fn shared_store_sees_agent_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "abc123").unwrap();

        let store = SecretStore::new();
        let agent = SecretAgent::start_with(store.clone(), [&path], WatchSettings::default())
            .await
            .unwrap();

        assert_eq!(&*store.censor(b"token abc123"), b"token CENSORED");
        agent.stop().await;
        // Values outlive the watchers.
        assert!(store.get(&path).is_some());
    }
}
