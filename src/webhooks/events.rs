//! Typed webhook events.
//!
//! A [`DispatchableEvent`] is only ever built by the parser after the payload
//! decoded and passed structural validation, so handlers can rely on the
//! repository, the comment of a note, and the head/base refs of a pull
//! request being present.

use serde::{Deserialize, Serialize};

use crate::types::{CommentId, IssueNumber, RepoId};

/// Type tag of comment events (on issues and pull requests alike).
pub const NOTE_EVENT: &str = "issue_comment";
/// Type tag of issue events.
pub const ISSUE_EVENT: &str = "issues";
/// Type tag of pull request events.
pub const PULL_REQUEST_EVENT: &str = "pull_request";
/// Type tag of push events.
pub const PUSH_EVENT: &str = "push";

/// A decoded, validated webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchableEvent {
    /// A comment on an issue or pull request.
    Note(NoteEvent),
    Issue(IssueEvent),
    PullRequest(PullRequestEvent),
    Push(PushEvent),
}

impl DispatchableEvent {
    /// The type tag this event was delivered under.
    pub fn tag(&self) -> &'static str {
        match self {
            DispatchableEvent::Note(_) => NOTE_EVENT,
            DispatchableEvent::Issue(_) => ISSUE_EVENT,
            DispatchableEvent::PullRequest(_) => PULL_REQUEST_EVENT,
            DispatchableEvent::Push(_) => PUSH_EVENT,
        }
    }

    /// Returns the repository this event belongs to.
    pub fn repo(&self) -> &RepoId {
        match self {
            DispatchableEvent::Note(e) => &e.repo,
            DispatchableEvent::Issue(e) => &e.repo,
            DispatchableEvent::PullRequest(e) => &e.repo,
            DispatchableEvent::Push(e) => &e.repo,
        }
    }

    /// Login of the user who triggered the event.
    pub fn actor(&self) -> &str {
        match self {
            DispatchableEvent::Note(e) => &e.commenter,
            DispatchableEvent::Issue(e) => &e.actor,
            DispatchableEvent::PullRequest(e) => &e.actor,
            DispatchableEvent::Push(e) => &e.pusher,
        }
    }

    /// The action verb reported by the platform. Pushes have none and
    /// report `"push"`.
    pub fn action(&self) -> &str {
        match self {
            DispatchableEvent::Note(e) => &e.action,
            DispatchableEvent::Issue(e) => &e.action,
            DispatchableEvent::PullRequest(e) => &e.action,
            DispatchableEvent::Push(_) => PUSH_EVENT,
        }
    }

    /// Web URL of the event subject, if the payload carried one.
    pub fn url(&self) -> Option<&str> {
        match self {
            DispatchableEvent::Note(e) => e.url.as_deref(),
            DispatchableEvent::Issue(e) => e.url.as_deref(),
            DispatchableEvent::PullRequest(e) => e.url.as_deref(),
            DispatchableEvent::Push(e) => e.compare_url.as_deref(),
        }
    }

    pub fn into_note(self) -> Option<NoteEvent> {
        match self {
            DispatchableEvent::Note(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_issue(self) -> Option<IssueEvent> {
        match self {
            DispatchableEvent::Issue(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_pull_request(self) -> Option<PullRequestEvent> {
        match self {
            DispatchableEvent::PullRequest(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_push(self) -> Option<PushEvent> {
        match self {
            DispatchableEvent::Push(e) => Some(e),
            _ => None,
        }
    }
}

/// What a comment was left on.
///
/// GitHub delivers comments on the pull request conversation tab as issue
/// comments; the issue carries a `pull_request` link in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteTarget {
    Issue(IssueNumber),
    PullRequest(IssueNumber),
}

impl NoteTarget {
    pub fn number(&self) -> IssueNumber {
        match self {
            NoteTarget::Issue(n) | NoteTarget::PullRequest(n) => *n,
        }
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self, NoteTarget::PullRequest(_))
    }
}

/// A comment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub repo: RepoId,

    /// `created`, `edited` or `deleted`.
    pub action: String,

    pub target: NoteTarget,

    pub comment_id: CommentId,

    /// The comment text. Empty for deleted comments.
    pub body: String,

    /// Login of the comment author.
    pub commenter: String,

    pub url: Option<String>,
}

impl NoteEvent {
    /// Whether this event reports a newly written comment.
    pub fn is_creating_comment(&self) -> bool {
        self.action == "created"
    }
}

/// An issue event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub repo: RepoId,
    pub action: String,
    pub number: IssueNumber,
    pub title: String,

    /// `open` or `closed`.
    pub state: String,

    /// Login of the issue author.
    pub author: String,

    /// Login of the user who performed the action.
    pub actor: String,

    pub labels: Vec<String>,
    pub url: Option<String>,
}

/// A branch reference on either side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// The branch name, e.g. `main`.
    pub name: String,
    pub sha: String,
}

/// A pull request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub repo: RepoId,

    /// `opened`, `closed`, `synchronize`, `labeled` and so on. Actions are
    /// passed through verbatim; bots decide which ones matter to them.
    pub action: String,

    pub number: IssueNumber,
    pub head: BranchRef,
    pub base: BranchRef,
    pub merged: bool,
    pub draft: bool,

    /// Login of the pull request author.
    pub author: String,

    /// Login of the user who performed the action.
    pub actor: String,

    pub labels: Vec<String>,
    pub url: Option<String>,
}

/// A push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: RepoId,

    /// The full ref pushed to, e.g. `refs/heads/main`.
    pub git_ref: String,

    pub before: String,

    /// The new head of the ref.
    pub after: String,

    pub pusher: String,
    pub compare_url: Option<String>,
}

impl PushEvent {
    /// The branch name, if the push targeted a branch.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }
}
