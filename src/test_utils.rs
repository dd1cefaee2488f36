//! Shared test fixtures: a small config document and webhook payload builders.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{ConfigDocument, ValidationError};

thread_local! {
    static VALIDATE_CALLS: Cell<usize> = const { Cell::new(0) };
    static SET_DEFAULT_CALLS: Cell<usize> = const { Cell::new(0) };
}

/// A config document that counts how often the agent validates and
/// defaults it (per thread, so parallel tests don't interfere).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub label: String,
}

impl ConfigDocument for TestConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        VALIDATE_CALLS.with(|c| c.set(c.get() + 1));
        if self.repos.is_empty() {
            return Err(ValidationError::new("repos must not be empty"));
        }
        Ok(())
    }

    fn set_default(&mut self) {
        SET_DEFAULT_CALLS.with(|c| c.set(c.get() + 1));
        if self.label.is_empty() {
            self.label = "default-label".to_string();
        }
    }
}

/// Call counters of [`TestConfig`] on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestConfigCalls {
    pub validate: usize,
    pub set_default: usize,
}

impl TestConfigCalls {
    pub fn snapshot() -> Self {
        TestConfigCalls {
            validate: VALIDATE_CALLS.with(Cell::get),
            set_default: SET_DEFAULT_CALLS.with(Cell::get),
        }
    }
}

/// Writes `content` to `config.yaml` in `dir`, replacing any previous file.
pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

fn repository(org: &str, repo: &str) -> Value {
    json!({
        "name": repo,
        "full_name": format!("{org}/{repo}"),
        "owner": { "login": org }
    })
}

/// An `issue_comment` payload, on a pull request when `on_pr` is set.
pub fn note_payload(org: &str, repo: &str, number: u64, on_pr: bool) -> Value {
    let mut issue = json!({
        "number": number,
        "title": "Add feature",
        "state": "open",
        "user": { "login": "author" }
    });
    if on_pr {
        issue["pull_request"] =
            json!({ "url": format!("https://api.github.com/repos/{org}/{repo}/pulls/{number}") });
    }

    json!({
        "action": "created",
        "comment": {
            "id": 12345,
            "body": "/lgtm",
            "user": { "login": "octocat" },
            "html_url": format!("https://github.com/{org}/{repo}/issues/{number}#issuecomment-12345")
        },
        "issue": issue,
        "repository": repository(org, repo),
        "sender": { "login": "octocat" }
    })
}

/// An `issues` payload for a newly opened issue.
pub fn issue_payload(org: &str, repo: &str, number: u64) -> Value {
    json!({
        "action": "opened",
        "issue": {
            "number": number,
            "title": "Crash on startup",
            "state": "open",
            "user": { "login": "reporter" },
            "labels": [{ "name": "kind/bug" }],
            "html_url": format!("https://github.com/{org}/{repo}/issues/{number}")
        },
        "repository": repository(org, repo),
        "sender": { "login": "reporter" }
    })
}

/// A `pull_request` payload for a newly opened pull request.
pub fn pull_request_payload(org: &str, repo: &str, number: u64) -> Value {
    json!({
        "action": "opened",
        "number": number,
        "pull_request": {
            "number": number,
            "head": {
                "sha": "1234567890abcdef1234567890abcdef12345678",
                "ref": "feature-branch"
            },
            "base": {
                "sha": "abcdef1234567890abcdef1234567890abcdef12",
                "ref": "main"
            },
            "draft": false,
            "merged": false,
            "user": { "login": "dev" },
            "labels": [],
            "html_url": format!("https://github.com/{org}/{repo}/pull/{number}")
        },
        "repository": repository(org, repo),
        "sender": { "login": "dev" }
    })
}

/// A `push` payload moving `git_ref` forward.
pub fn push_payload(org: &str, repo: &str, git_ref: &str) -> Value {
    json!({
        "ref": git_ref,
        "before": "a".repeat(40),
        "after": "b".repeat(40),
        "compare": format!("https://github.com/{org}/{repo}/compare/aaaa...bbbb"),
        "pusher": { "name": "octocat" },
        "repository": repository(org, repo),
        "sender": { "login": "octocat" }
    })
}
