//! Cancellable recurring background task.
//!
//! A [`PeriodicTask`] owns one tokio task that runs an async action on a fixed
//! interval until stopped. Stopping is synchronous from the caller's point of
//! view: [`PeriodicTask::stop`] cancels the loop and then awaits the task's
//! exit, so once it returns the action will never run again.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► running ──stop()──► stopped
//!                │
//!                └──drop()──► cancelled (not awaited)
//! ```
//!
//! Invocations never overlap: the loop awaits each action before waiting for
//! the next tick. If an action overruns the interval, the next tick is delayed
//! rather than fired in a burst.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Shortest interval accepted; tokio's interval rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest interval or initial delay honoured. Longer ones are clamped so
/// tick deadlines stay representable as an `Instant`.
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A running periodic task.
///
/// Each instance is started exactly once (by [`PeriodicTask::start`]) and can
/// be stopped any number of times; only the first [`stop`](Self::stop) does
/// any work, later calls wait for it and return.
pub struct PeriodicTask {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawns the background loop.
    ///
    /// With a zero `initial_delay` the first invocation happens immediately;
    /// otherwise it happens after `initial_delay`. Later invocations follow
    /// every `interval`.
    ///
    /// Errors inside `action` are the action's own business: the loop never
    /// inspects the outcome, so the closure should log whatever it needs to.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(mut action: F, interval: Duration, initial_delay: Duration) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        let initial_delay = initial_delay.min(MAX_INTERVAL);

        debug!(
            interval_ms = period.as_millis() as u64,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "Starting periodic task"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Cancellation wins over a tick that is ready at the same time.
                    biased;

                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                trace!("Periodic task tick");
                action().await;
            }

            debug!("Periodic task loop exited");
        });

        PeriodicTask {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stops the task and waits until the background loop has exited.
    ///
    /// An action that is mid-flight when `stop` is called runs to completion
    /// first. Calling `stop` again (or concurrently) is a no-op that returns
    /// once the first call has finished.
    pub async fn stop(&self) {
        let mut guard = self.handle.lock().await;
        self.cancel.cancel();

        if let Some(handle) = guard.take() {
            // A panicking action ends the loop early; either way it is gone.
            if let Err(e) = handle.await
                && e.is_panic()
            {
                error!("Periodic task action panicked");
            }
            debug!("Periodic task stopped");
        }
    }

    /// Returns true until a stop has been requested.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Dropping without stop() still ends the loop at its next await point.
        self.cancel.cancel();
    }
}
