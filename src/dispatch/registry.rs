//! Type tag to handler mapping, filled once at startup.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{Span, warn};

use crate::config::ConfigSnapshot;
use crate::webhooks::{
    DispatchableEvent, ISSUE_EVENT, IssueEvent, NOTE_EVENT, NoteEvent, PULL_REQUEST_EVENT,
    PUSH_EVENT, ParseError, PullRequestEvent, PushEvent, parse_issue, parse_note,
    parse_pull_request, parse_push,
};

/// An error a handler reports back to the dispatcher, which logs it.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A typed handler was given an event of another kind. Only possible
    /// when a custom decoder is registered under a typed handler's tag.
    #[error("handler for {expected} events received a {received} event")]
    UnexpectedEvent {
        expected: &'static str,
        received: &'static str,
    },

    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wraps any error (or message) as a handler failure.
    pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Failed(error.into())
    }
}

/// Turns raw payload bytes into a validated event.
pub type Decoder = fn(&[u8]) -> Result<DispatchableEvent, ParseError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// A type-erased handler. It receives the event, the configuration snapshot
/// pinned for this event, and the event's tracing span.
pub type Handler<C> =
    Arc<dyn Fn(DispatchableEvent, Arc<ConfigSnapshot<C>>, Span) -> HandlerFuture + Send + Sync>;

/// A registered decoder and handler pair.
pub struct Entry<C> {
    decoder: Decoder,
    handler: Handler<C>,
}

impl<C> Entry<C> {
    pub fn decode(&self, payload: &[u8]) -> Result<DispatchableEvent, ParseError> {
        (self.decoder)(payload)
    }

    pub fn handler(&self) -> &Handler<C> {
        &self.handler
    }
}

/// Maps event type tags to handlers.
///
/// Built before the dispatcher and moved into it; the dispatcher never
/// mutates it. Registering a tag twice replaces the earlier entry.
pub struct HandlerRegistry<C> {
    entries: HashMap<String, Entry<C>>,
}

impl<C> Default for HandlerRegistry<C> {
    fn default() -> Self {
        HandlerRegistry {
            entries: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for HandlerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.entries.keys().collect();
        tags.sort();
        f.debug_struct("HandlerRegistry").field("tags", &tags).finish()
    }
}

impl<C: Send + Sync + 'static> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events delivered under `tag`.
    pub fn register<F, Fut>(&mut self, tag: impl Into<String>, decoder: Decoder, handler: F) -> &mut Self
    where
        F: Fn(DispatchableEvent, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let tag = tag.into();
        let handler: Handler<C> = Arc::new(move |event, config, span| -> HandlerFuture {
            Box::pin(handler(event, config, span))
        });

        if self
            .entries
            .insert(tag.clone(), Entry { decoder, handler })
            .is_some()
        {
            warn!(event_type = %tag, "Replacing previously registered handler");
        }
        self
    }

    /// Registers a handler for comment events.
    pub fn on_note<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(NoteEvent, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_typed(
            NOTE_EVENT,
            |payload| parse_note(payload).map(DispatchableEvent::Note),
            DispatchableEvent::into_note,
            handler,
        )
    }

    /// Registers a handler for issue events.
    pub fn on_issue<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(IssueEvent, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_typed(
            ISSUE_EVENT,
            |payload| parse_issue(payload).map(DispatchableEvent::Issue),
            DispatchableEvent::into_issue,
            handler,
        )
    }

    /// Registers a handler for pull request events.
    pub fn on_pull_request<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(PullRequestEvent, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_typed(
            PULL_REQUEST_EVENT,
            |payload| parse_pull_request(payload).map(DispatchableEvent::PullRequest),
            DispatchableEvent::into_pull_request,
            handler,
        )
    }

    /// Registers a handler for push events.
    pub fn on_push<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(PushEvent, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_typed(
            PUSH_EVENT,
            |payload| parse_push(payload).map(DispatchableEvent::Push),
            DispatchableEvent::into_push,
            handler,
        )
    }

    fn register_typed<E, F, Fut>(
        &mut self,
        tag: &'static str,
        decoder: Decoder,
        extract: fn(DispatchableEvent) -> Option<E>,
        handler: F,
    ) -> &mut Self
    where
        E: Send + 'static,
        F: Fn(E, Arc<ConfigSnapshot<C>>, Span) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(tag, decoder, move |event: DispatchableEvent, config, span| {
            let received = event.tag();
            let call = extract(event).map(|typed| handler(typed, config, span));
            async move {
                match call {
                    Some(fut) => fut.await,
                    None => Err(HandlerError::UnexpectedEvent {
                        expected: tag,
                        received,
                    }),
                }
            }
        })
    }

    pub fn lookup(&self, tag: &str) -> Option<&Entry<C>> {
        self.entries.get(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
