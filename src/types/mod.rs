//! Identifier types shared by the event model and the log fields.

pub mod ids;

pub use ids::{CommentId, EventId, IssueNumber, RepoId};
