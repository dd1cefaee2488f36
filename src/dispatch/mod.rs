//! Event dispatch: the handler registry and the dispatcher that runs it.
//!
//! A bot fills a [`HandlerRegistry`] at startup, then hands it to an
//! [`EventDispatcher`] together with its [`ConfigAgent`](crate::config::ConfigAgent).
//! From then on the registry is read-only.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Dispatch, DispatchError, DispatchOutcome, EventDispatcher};
pub use registry::{Decoder, Entry, Handler, HandlerError, HandlerFuture, HandlerRegistry};
