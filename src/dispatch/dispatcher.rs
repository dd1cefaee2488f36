//! Concurrent event dispatch with drain-on-shutdown.
//!
//! ```text
//!  dispatch(tag, payload)
//!        │
//!        ├─ tag not registered ───────────► Ok(Ignored)
//!        ├─ decode / validate fails ──────► Err(..)        (nothing spawned)
//!        └─ spawn tracked task ───────────► Ok(Spawned)
//!                 │
//!                 ├─ pin get_config() for this event
//!                 ├─ run handler (its own task, so panics stay contained)
//!                 └─ log outcome
//! ```
//!
//! Events are independent: there is no ordering between them, and a failing
//! or panicking handler affects nothing but its own event.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::registry::HandlerRegistry;
use crate::config::{ConfigAgent, ConfigDocument};
use crate::webhooks::ParseError;

/// Why an event was refused before any handler ran.
pub type DispatchError = ParseError;

/// What [`EventDispatcher::dispatch`] did with an accepted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the type tag.
    Ignored,
    /// A handler task was started.
    Spawned,
}

/// The dispatch entry point used by the HTTP layer.
///
/// Implemented by [`EventDispatcher`] for every config type, so the router
/// does not need to be generic over it.
pub trait Dispatch: Send + Sync {
    fn dispatch(
        &self,
        event_type: &str,
        payload: &[u8],
        span: &Span,
    ) -> Result<DispatchOutcome, DispatchError>;
}

/// Routes events to handlers and tracks the handler tasks.
pub struct EventDispatcher<C> {
    agent: ConfigAgent<C>,
    registry: HandlerRegistry<C>,
    tracker: TaskTracker,
}

impl<C: ConfigDocument> EventDispatcher<C> {
    /// Takes ownership of a fully populated registry.
    pub fn new(agent: ConfigAgent<C>, registry: HandlerRegistry<C>) -> Self {
        debug!(?registry, "Creating event dispatcher");
        EventDispatcher {
            agent,
            registry,
            tracker: TaskTracker::new(),
        }
    }

    /// Decodes the payload and starts its handler in the background.
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// handler task is spawned.
    pub fn dispatch(
        &self,
        event_type: &str,
        payload: &[u8],
        parent: &Span,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(entry) = self.registry.lookup(event_type) else {
            debug!(parent: parent, event_type, "Ignoring unknown event type");
            return Ok(DispatchOutcome::Ignored);
        };

        let event = entry.decode(payload)?;

        let repo = event.repo();
        let span = info_span!(
            parent: parent,
            "handle_event",
            event_type,
            org = %repo.org,
            repo = %repo.repo,
            action = event.action(),
            actor = event.actor(),
            url = event.url().unwrap_or_default(),
        );

        let handler = Arc::clone(entry.handler());
        let agent = self.agent.clone();
        let handler_span = span.clone();

        self.tracker.spawn(
            async move {
                // Read once: the handler sees this snapshot even if a reload
                // publishes a newer one while it runs.
                let config = agent.get_config();

                // The closure itself is called on the inner task too, so a
                // panic before it returns a future is reported like any other.
                let span = handler_span.clone();
                let call = async move { handler(event, config, span).await };
                match tokio::spawn(call.instrument(handler_span)).await {
                    Ok(Ok(())) => info!("Event handled"),
                    Ok(Err(e)) => error!(error = %e, "Event handler failed"),
                    Err(e) if e.is_panic() => error!("Event handler panicked"),
                    Err(_) => warn!("Event handler was cancelled"),
                }
            }
            .instrument(span),
        );

        Ok(DispatchOutcome::Spawned)
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until no handler task is running.
    ///
    /// Events dispatched while waiting are still tracked and waited for.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Waits for running handlers, giving up after `grace`.
    ///
    /// Returns true if every handler finished in time. Handlers still
    /// running when the grace period ends are left to run; they are not
    /// cancelled.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(
            in_flight = self.in_flight(),
            grace_secs = grace.as_secs(),
            "Waiting for in-flight event handlers"
        );

        match tokio::time::timeout(grace, self.wait()).await {
            Ok(()) => {
                info!("All event handlers finished");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.in_flight(),
                    "Grace period elapsed with event handlers still running"
                );
                false
            }
        }
    }

    /// The config agent handlers read their snapshots from.
    pub fn agent(&self) -> &ConfigAgent<C> {
        &self.agent
    }
}

impl<C: ConfigDocument> Dispatch for EventDispatcher<C> {
    fn dispatch(
        &self,
        event_type: &str,
        payload: &[u8],
        span: &Span,
    ) -> Result<DispatchOutcome, DispatchError> {
        EventDispatcher::dispatch(self, event_type, payload, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerError;
    use crate::test_utils::{
        TestConfig, issue_payload, note_payload, pull_request_payload, push_payload, write_config,
    };
    use crate::webhooks::{ISSUE_EVENT, NOTE_EVENT, PULL_REQUEST_EVENT, PUSH_EVENT};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};
    use tokio::sync::{Notify, oneshot};
    use tokio::time::Instant;
    use tracing_test::traced_test;

    const LONG: Duration = Duration::from_secs(3600);

    async fn dispatcher(
        registry: HandlerRegistry<TestConfig>,
    ) -> (EventDispatcher<TestConfig>, TempDir) {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "repos: [\"org/repo1\"]\n");
        let agent = ConfigAgent::<TestConfig>::start(&path, LONG).await.unwrap();
        (EventDispatcher::new(agent, registry), dir)
    }

    fn bytes(value: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    fn counting_registry(calls: &Arc<AtomicUsize>) -> HandlerRegistry<TestConfig> {
        let mut registry = HandlerRegistry::<TestConfig>::new();
        let calls = Arc::clone(calls);
        registry.on_pull_request(move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        registry
    }

    // ─── Routing ───

    #[tokio::test]
    async fn unknown_tag_is_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _dir) = dispatcher(counting_registry(&calls)).await;

        let outcome = dispatcher
            .dispatch(
                "check_suite",
                &bytes(&pull_request_payload("org", "repo1", 1)),
                &Span::none(),
            )
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert_eq!(dispatcher.in_flight(), 0);
        dispatcher.wait().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registered_tag_without_handler_for_it_is_ignored() {
        // Only pull_request is registered; a valid push is still ignored.
        let calls = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _dir) = dispatcher(counting_registry(&calls)).await;

        let outcome = dispatcher
            .dispatch(
                PUSH_EVENT,
                &bytes(&push_payload("org", "repo1", "refs/heads/main")),
                &Span::none(),
            )
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn each_kind_reaches_its_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::<TestConfig>::new();
        {
            let seen = Arc::clone(&seen);
            registry.on_note(move |e, _, _| {
                seen.lock().unwrap().push(format!("note {}", e.target.number()));
                async { Ok(()) }
            });
        }
        {
            let seen = Arc::clone(&seen);
            registry.on_issue(move |e, _, _| {
                seen.lock().unwrap().push(format!("issue {}", e.number));
                async { Ok(()) }
            });
        }
        {
            let seen = Arc::clone(&seen);
            registry.on_pull_request(move |e, _, _| {
                seen.lock().unwrap().push(format!("pr {}", e.number));
                async { Ok(()) }
            });
        }
        {
            let seen = Arc::clone(&seen);
            registry.on_push(move |e, _, _| {
                seen.lock().unwrap().push(format!("push {}", e.git_ref));
                async { Ok(()) }
            });
        }
        let (dispatcher, _dir) = dispatcher(registry).await;

        let deliveries = [
            (NOTE_EVENT, note_payload("org", "repo1", 1, true)),
            (ISSUE_EVENT, issue_payload("org", "repo1", 2)),
            (PULL_REQUEST_EVENT, pull_request_payload("org", "repo1", 3)),
            (PUSH_EVENT, push_payload("org", "repo1", "refs/heads/main")),
        ];
        for (tag, payload) in &deliveries {
            let outcome = dispatcher.dispatch(tag, &bytes(payload), &Span::none()).unwrap();
            assert_eq!(outcome, DispatchOutcome::Spawned);
        }
        dispatcher.wait().await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["issue #2", "note #1", "pr #3", "push refs/heads/main"]);
    }

    // ─── Rejection before spawn ───

    #[tokio::test]
    async fn malformed_payload_is_rejected_without_spawning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _dir) = dispatcher(counting_registry(&calls)).await;

        let result = dispatcher.dispatch(PULL_REQUEST_EVENT, b"{\"action\": ", &Span::none());
        assert!(matches!(result, Err(ParseError::Decode { .. })));
        assert_eq!(dispatcher.in_flight(), 0);

        dispatcher.wait().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn structurally_invalid_payload_is_rejected_without_spawning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _dir) = dispatcher(counting_registry(&calls)).await;

        let mut payload = pull_request_payload("org", "repo1", 1);
        payload.as_object_mut().unwrap().remove("repository");

        let result = dispatcher.dispatch(PULL_REQUEST_EVENT, &bytes(&payload), &Span::none());
        match result {
            Err(ParseError::Validation(e)) => assert_eq!(e.field, "repository"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(dispatcher.in_flight(), 0);

        dispatcher.wait().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // ─── Drain ───

    #[tokio::test]
    async fn wait_drains_all_running_handlers() {
        const HANDLERS: u64 = 5;

        let finished = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::<TestConfig>::new();
        {
            let finished = Arc::clone(&finished);
            registry.on_pull_request(move |e, _, _| {
                let finished = Arc::clone(&finished);
                async move {
                    // PR n sleeps n * 30ms.
                    tokio::time::sleep(Duration::from_millis(e.number.0 * 30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        let (dispatcher, _dir) = dispatcher(registry).await;

        let start = Instant::now();
        for n in 1..=HANDLERS {
            dispatcher
                .dispatch(
                    PULL_REQUEST_EVENT,
                    &bytes(&pull_request_payload("org", "repo1", n)),
                    &Span::none(),
                )
                .unwrap();
        }
        assert_eq!(dispatcher.in_flight(), HANDLERS as usize);

        // The shutdown sequence runs while handlers are still sleeping.
        tokio::join!(dispatcher.agent().stop(), dispatcher.wait());

        assert!(start.elapsed() >= Duration::from_millis(HANDLERS * 30));
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(finished.load(Ordering::SeqCst), HANDLERS as usize);
    }

    #[tokio::test]
    async fn wait_with_nothing_in_flight_returns_immediately() {
        let (dispatcher, _dir) = dispatcher(HandlerRegistry::<TestConfig>::new()).await;
        tokio::time::timeout(Duration::from_secs(1), dispatcher.wait())
            .await
            .expect("nothing to drain");
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_grace_period() {
        let release = Arc::new(Notify::new());
        let mut registry = HandlerRegistry::<TestConfig>::new();
        {
            let release = Arc::clone(&release);
            registry.on_push(move |_, _, _| {
                let release = Arc::clone(&release);
                async move {
                    release.notified().await;
                    Ok(())
                }
            });
        }
        let (dispatcher, _dir) = dispatcher(registry).await;

        dispatcher
            .dispatch(
                PUSH_EVENT,
                &bytes(&push_payload("org", "repo1", "refs/heads/main")),
                &Span::none(),
            )
            .unwrap();

        assert!(!dispatcher.shutdown(Duration::from_millis(50)).await);
        assert_eq!(dispatcher.in_flight(), 1, "over-running handler is not killed");

        release.notify_one();
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    // ─── Isolation ───

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_isolated() {
        let succeeded = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::<TestConfig>::new();
        {
            let succeeded = Arc::clone(&succeeded);
            registry.on_push(move |e, _, _| {
                let succeeded = Arc::clone(&succeeded);
                async move {
                    match e.repo.repo.as_str() {
                        "fails" => Err(HandlerError::failed("remote API returned 502")),
                        "panics" => panic!("handler bug"),
                        _ => {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }
                }
            });
        }
        let (dispatcher, _dir) = dispatcher(registry).await;

        for repo in ["ok1", "fails", "panics", "ok2"] {
            dispatcher
                .dispatch(
                    PUSH_EVENT,
                    &bytes(&push_payload("org", repo, "refs/heads/main")),
                    &Span::none(),
                )
                .unwrap();
        }
        dispatcher.wait().await;

        assert_eq!(succeeded.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn handler_panicking_before_returning_a_future_is_logged() {
        let mut registry = HandlerRegistry::<TestConfig>::new();
        registry.on_push(|e, _, _| -> std::future::Ready<Result<(), HandlerError>> {
            panic!("no handler for {}", e.git_ref)
        });
        let (dispatcher, _dir) = dispatcher(registry).await;

        let outcome = dispatcher
            .dispatch(
                PUSH_EVENT,
                &bytes(&push_payload("org", "repo1", "refs/heads/main")),
                &Span::current(),
            )
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Spawned);
        dispatcher.wait().await;

        assert_eq!(dispatcher.in_flight(), 0);
        assert!(logs_contain("Event handler panicked"));
    }

    // ─── Config pinning ───

    #[tokio::test]
    async fn handler_keeps_the_snapshot_it_started_with() {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Mutex::new(Some(started_tx));
        let release = Arc::new(Notify::new());
        let observed = Arc::new(Mutex::new(None));

        let mut registry = HandlerRegistry::<TestConfig>::new();
        {
            let release = Arc::clone(&release);
            let observed = Arc::clone(&observed);
            registry.on_push(move |_, config, _| {
                if let Some(tx) = started_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                let release = Arc::clone(&release);
                let observed = Arc::clone(&observed);
                async move {
                    release.notified().await;
                    *observed.lock().unwrap() = Some(config.document().repos.clone());
                    Ok(())
                }
            });
        }
        let (dispatcher, dir) = dispatcher(registry).await;

        dispatcher
            .dispatch(
                PUSH_EVENT,
                &bytes(&push_payload("org", "repo1", "refs/heads/main")),
                &Span::none(),
            )
            .unwrap();
        started_rx.await.unwrap();

        write_config(dir.path(), "repos: [\"org/repo2\"]\n");
        dispatcher.agent().reload().await.unwrap();
        assert_eq!(dispatcher.agent().get_config().document().repos, vec!["org/repo2"]);

        release.notify_one();
        dispatcher.wait().await;

        assert_eq!(
            observed.lock().unwrap().clone(),
            Some(vec!["org/repo1".to_string()])
        );
        dispatcher.agent().stop().await;
    }
}
