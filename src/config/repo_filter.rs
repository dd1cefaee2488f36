//! Per-repository scoping for bot configuration items.
//!
//! Bots usually carry a list of configuration items, each applying to some
//! set of repositories. An item lists entries that are either a whole
//! organization (`org`) or a single repository (`org/repo`), optionally
//! excluding repositories from an organization-wide entry.
//!
//! ```yaml
//! config_items:
//!   - repos: ["openeuler"]
//!     excluded_repos: ["openeuler/infrastructure"]
//!     label: org-wide
//!   - repos: ["openeuler/infrastructure"]
//!     label: infra-only
//! ```

use serde::{Deserialize, Serialize};

use super::ValidationError;
use crate::types::RepoId;

/// The repositories a configuration item applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFilter {
    /// Entries in the form `org/repo` or just `org`.
    #[serde(default)]
    pub repos: Vec<String>,

    /// Entries in the form `org/repo`, excluded from an `org` entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_repos: Vec<String>,
}

/// How a filter matched a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterMatch {
    /// The item applies to this repository.
    pub applies_to_repo: bool,

    /// The match came from an organization-wide entry (rather than an
    /// explicit `org/repo` entry).
    pub via_org: bool,
}

impl RepoFilter {
    /// Reports whether this filter applies to `org/repo`.
    ///
    /// | `applies_to_repo` | `via_org` | meaning                                  |
    /// |-------------------|-----------|------------------------------------------|
    /// | true              | false     | `org/repo` is listed explicitly          |
    /// | true              | true      | `org` is listed and the repo not excluded |
    /// | false             | true      | `org` is listed but the repo is excluded  |
    /// | false             | false     | neither is listed                        |
    pub fn can_apply(&self, repo: &RepoId) -> FilterMatch {
        let full_name = repo.full_name();

        if self.repos.iter().any(|r| *r == full_name) {
            return FilterMatch {
                applies_to_repo: true,
                via_org: false,
            };
        }

        if !self.repos.iter().any(|r| *r == repo.org) {
            return FilterMatch {
                applies_to_repo: false,
                via_org: false,
            };
        }

        let excluded = self.excluded_repos.iter().any(|r| *r == full_name);
        FilterMatch {
            applies_to_repo: !excluded,
            via_org: true,
        }
    }

    /// Rejects filters that list an entry as both included and excluded.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(both) = self
            .excluded_repos
            .iter()
            .find(|excluded| self.repos.contains(excluded))
        {
            return Err(ValidationError::new(format!(
                "{both} exists in both repos and excluded_repos"
            )));
        }
        Ok(())
    }
}

/// A configuration item scoped by a [`RepoFilter`].
pub trait RepoScoped {
    fn repo_filter(&self) -> &RepoFilter;
}

impl RepoScoped for RepoFilter {
    fn repo_filter(&self) -> &RepoFilter {
        self
    }
}

/// Finds the item that applies to `repo`.
///
/// An item naming the repository explicitly wins immediately. Otherwise the
/// last item matching through an organization-wide entry is returned.
pub fn find_config<'a, T: RepoScoped>(repo: &RepoId, items: &'a [T]) -> Option<&'a T> {
    let mut org_match = None;

    for item in items {
        let m = item.repo_filter().can_apply(repo);
        if !m.applies_to_repo {
            continue;
        }
        if !m.via_org {
            return Some(item);
        }
        org_match = Some(item);
    }

    org_match
}
