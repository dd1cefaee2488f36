//! Webhook payloads from GitHub-format code hosting platforms.
//!
//! This module provides:
//! - Typed events for the four event kinds bots react to (comments, issues,
//!   pull requests, pushes)
//! - A two-phase parser (decode, then structural validation) per kind

pub mod events;
pub mod parser;

pub use events::{
    BranchRef, DispatchableEvent, ISSUE_EVENT, IssueEvent, NOTE_EVENT, NoteEvent, NoteTarget,
    PULL_REQUEST_EVENT, PUSH_EVENT, PullRequestEvent, PushEvent,
};
pub use parser::{ParseError, ValidationError, parse_issue, parse_note, parse_pull_request, parse_push};
