//! Robot Runtime - the core shared by webhook-driven code-hosting bots.
//!
//! This library keeps a bot's configuration file hot-reloaded and dispatches
//! incoming webhook events to per-type handlers, each running concurrently
//! against the configuration snapshot current when its event arrived.

pub mod config;
pub mod dispatch;
pub mod options;
pub mod periodic;
pub mod secret;
pub mod server;
pub mod service;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
