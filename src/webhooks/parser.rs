//! GitHub webhook payload parser.
//!
//! Parsing happens in two phases:
//!
//! 1. **Decode.** The payload is deserialized into loose raw structures where
//!    nearly every nested object is optional. Only malformed JSON or a value
//!    of the wrong type fails here.
//! 2. **Validate.** The raw structure is checked for the objects a handler
//!    relies on (the repository with its owner and name, the comment of a
//!    note, the head and base of a pull request). A missing object fails
//!    with a [`ValidationError`] naming the field.
//!
//! Only a payload that passes both phases becomes a typed event.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{CommentId, IssueNumber, RepoId};

use super::events::{
    BranchRef, ISSUE_EVENT, IssueEvent, NOTE_EVENT, NoteEvent, NoteTarget, PULL_REQUEST_EVENT,
    PUSH_EVENT, PullRequestEvent, PushEvent,
};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not JSON of the expected shape.
    #[error("failed to decode {event_type} payload: {source}")]
    Decode {
        event_type: &'static str,
        source: serde_json::Error,
    },

    /// The payload decoded but lacks an object handlers rely on.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A decoded payload missing a required object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event_type} is illegal: the {field} field is empty")]
pub struct ValidationError {
    pub event_type: &'static str,
    pub field: &'static str,
}

impl ValidationError {
    fn new(event_type: &'static str, field: &'static str) -> Self {
        ValidationError { event_type, field }
    }
}

fn decode<'a, T: Deserialize<'a>>(event_type: &'static str, payload: &'a [u8]) -> Result<T, ParseError> {
    serde_json::from_slice(payload).map_err(|source| ParseError::Decode { event_type, source })
}

// ============================================================================
// Raw payload structures for deserialization
//
// Nested objects are Option<T> so that a missing object is reported by the
// validation phase with the field's name rather than as a decode error.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: Option<RawUser>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: Option<String>,
}

fn validate_repository(
    event_type: &'static str,
    repository: Option<RawRepository>,
) -> Result<RepoId, ValidationError> {
    let repository = repository.ok_or(ValidationError::new(event_type, "repository"))?;

    let org = repository.owner.and_then(|o| o.login).unwrap_or_default();
    let name = repository.name.unwrap_or_default();
    if org.is_empty() || name.is_empty() {
        return Err(ValidationError::new(
            event_type,
            "repository.owner.login or repository.name",
        ));
    }

    Ok(RepoId::new(org, name))
}

fn login(user: Option<RawUser>) -> String {
    user.and_then(|u| u.login).unwrap_or_default()
}

fn label_names(labels: Option<Vec<RawLabel>>) -> Vec<String> {
    labels
        .unwrap_or_default()
        .into_iter()
        .filter_map(|l| l.name)
        .collect()
}

// ============================================================================
// issue_comment event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawNotePayload {
    action: Option<String>,
    comment: Option<RawComment>,
    issue: Option<RawIssue>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: Option<u64>,
    body: Option<String>,
    user: Option<RawUser>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: Option<u64>,
    title: Option<String>,
    state: Option<String>,
    user: Option<RawUser>,
    labels: Option<Vec<RawLabel>>,
    html_url: Option<String>,
    // Present when the issue is actually a pull request.
    pull_request: Option<serde_json::Value>,
}

/// Parses an `issue_comment` payload.
pub fn parse_note(payload: &[u8]) -> Result<NoteEvent, ParseError> {
    let raw: RawNotePayload = decode(NOTE_EVENT, payload)?;

    let comment = raw
        .comment
        .ok_or(ValidationError::new(NOTE_EVENT, "comment"))?;
    let issue = raw.issue.ok_or(ValidationError::new(NOTE_EVENT, "issue"))?;
    let repo = validate_repository(NOTE_EVENT, raw.repository)?;

    let number = IssueNumber(issue.number.unwrap_or_default());
    let target = match issue.pull_request {
        Some(serde_json::Value::Null) | None => NoteTarget::Issue(number),
        Some(_) => NoteTarget::PullRequest(number),
    };

    Ok(NoteEvent {
        repo,
        action: raw.action.unwrap_or_default(),
        target,
        comment_id: CommentId(comment.id.unwrap_or_default()),
        body: comment.body.unwrap_or_default(),
        commenter: login(comment.user),
        url: comment.html_url,
    })
}

// ============================================================================
// issues event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawIssuePayload {
    action: Option<String>,
    issue: Option<RawIssue>,
    repository: Option<RawRepository>,
    sender: Option<RawUser>,
}

/// Parses an `issues` payload.
pub fn parse_issue(payload: &[u8]) -> Result<IssueEvent, ParseError> {
    let raw: RawIssuePayload = decode(ISSUE_EVENT, payload)?;

    let issue = raw.issue.ok_or(ValidationError::new(ISSUE_EVENT, "issue"))?;
    let repo = validate_repository(ISSUE_EVENT, raw.repository)?;

    Ok(IssueEvent {
        repo,
        action: raw.action.unwrap_or_default(),
        number: IssueNumber(issue.number.unwrap_or_default()),
        title: issue.title.unwrap_or_default(),
        state: issue.state.unwrap_or_default(),
        author: login(issue.user),
        actor: login(raw.sender),
        labels: label_names(issue.labels),
        url: issue.html_url,
    })
}

// ============================================================================
// pull_request event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: Option<String>,
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
    sender: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<u64>,
    merged: Option<bool>,
    draft: Option<bool>,
    head: Option<RawRef>,
    base: Option<RawRef>,
    user: Option<RawUser>,
    labels: Option<Vec<RawLabel>>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: Option<String>,
    #[serde(rename = "ref")]
    ref_name: Option<String>,
}

impl From<RawRef> for BranchRef {
    fn from(raw: RawRef) -> Self {
        BranchRef {
            name: raw.ref_name.unwrap_or_default(),
            sha: raw.sha.unwrap_or_default(),
        }
    }
}

/// Parses a `pull_request` payload.
///
/// Every action is passed through, including the ones (labeled, assigned)
/// most bots ignore.
pub fn parse_pull_request(payload: &[u8]) -> Result<PullRequestEvent, ParseError> {
    let raw: RawPullRequestPayload = decode(PULL_REQUEST_EVENT, payload)?;

    let pr = raw
        .pull_request
        .ok_or(ValidationError::new(PULL_REQUEST_EVENT, "pull_request"))?;
    let (Some(head), Some(base)) = (pr.head, pr.base) else {
        return Err(ValidationError::new(
            PULL_REQUEST_EVENT,
            "pull_request.head or pull_request.base",
        )
        .into());
    };
    let repo = validate_repository(PULL_REQUEST_EVENT, raw.repository)?;

    Ok(PullRequestEvent {
        repo,
        action: raw.action.unwrap_or_default(),
        number: IssueNumber(pr.number.unwrap_or_default()),
        head: head.into(),
        base: base.into(),
        merged: pr.merged.unwrap_or(false),
        draft: pr.draft.unwrap_or(false),
        author: login(pr.user),
        actor: login(raw.sender),
        labels: label_names(pr.labels),
        url: pr.html_url,
    })
}

// ============================================================================
// push event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    before: Option<String>,
    after: Option<String>,
    compare: Option<String>,
    pusher: Option<RawPusher>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawPusher {
    name: Option<String>,
}

/// Parses a `push` payload.
pub fn parse_push(payload: &[u8]) -> Result<PushEvent, ParseError> {
    let raw: RawPushPayload = decode(PUSH_EVENT, payload)?;

    let repo = validate_repository(PUSH_EVENT, raw.repository)?;

    Ok(PushEvent {
        repo,
        git_ref: raw.git_ref.unwrap_or_default(),
        before: raw.before.unwrap_or_default(),
        after: raw.after.unwrap_or_default(),
        pusher: raw.pusher.and_then(|p| p.name).unwrap_or_default(),
        compare_url: raw.compare,
    })
}
