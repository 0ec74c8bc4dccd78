//! Core types for spr

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Length of a commit-id in hex characters
pub const COMMIT_ID_LEN: usize = 8;

/// Stable identifier tracking one commit across amends and rebases
///
/// Always exactly eight lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// Validate and wrap a commit-id
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == COMMIT_ID_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::Internal(format!("invalid commit-id: {s:?}")))
        }
    }

    /// Draw a fresh random id that is not in `taken`
    pub fn generate(taken: &HashSet<Self>) -> Self {
        loop {
            let simple = uuid::Uuid::new_v4().simple().to_string();
            let candidate = Self(simple[..COMMIT_ID_LEN].to_string());
            if !taken.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CommitId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

/// One local commit in the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Git commit hash (hex)
    pub hash: String,
    /// Stable commit-id from the message trailer
    pub commit_id: CommitId,
    /// First line of the commit message
    pub subject: String,
    /// Full commit message (includes subject and trailer)
    pub message: String,
}

impl CommitEntry {
    /// Work-in-progress commits are never submitted
    pub fn is_wip(&self) -> bool {
        self.subject
            .get(..3)
            .is_some_and(|p| p.eq_ignore_ascii_case("wip"))
    }

    /// Message body for the PR description: everything after the subject,
    /// without the commit-id trailer
    pub fn pr_body(&self) -> String {
        let without_trailer = crate::stack::strip_trailer(&self.message);
        without_trailer
            .split_once('\n')
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default()
    }

    /// Abbreviated hash for display
    pub fn short_hash(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

/// Ordered local commits, oldest first (base to tip)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalStack {
    /// The base reference the stack was resolved against
    pub base: String,
    /// Commits from base (index 0) to tip (last index)
    pub entries: Vec<CommitEntry>,
}

impl LocalStack {
    /// Number of commits in the stack
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack has no commits
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by commit-id
    pub fn get(&self, id: &CommitId) -> Option<&CommitEntry> {
        self.entries.iter().find(|e| &e.commit_id == id)
    }

    /// Stack position of a commit-id
    pub fn position(&self, id: &CommitId) -> Option<usize> {
        self.entries.iter().position(|e| &e.commit_id == id)
    }

    /// Entries below the first WIP commit
    pub fn submittable(&self) -> &[CommitEntry] {
        let end = self
            .entries
            .iter()
            .position(CommitEntry::is_wip)
            .unwrap_or(self.entries.len());
        &self.entries[..end]
    }

    /// Submittable entries, capped at the bottom `count` when given
    pub fn submittable_prefix(&self, count: Option<usize>) -> &[CommitEntry] {
        let submittable = self.submittable();
        match count {
            Some(n) if n < submittable.len() => &submittable[..n],
            _ => submittable,
        }
    }

    /// Entries above [`Self::submittable_prefix`]
    pub fn held_back(&self, count: Option<usize>) -> &[CommitEntry] {
        &self.entries[self.submittable_prefix(count).len()..]
    }
}

/// A git remote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRemote {
    /// Remote name (e.g., "origin")
    pub name: String,
    /// Remote URL
    pub url: String,
}

/// Repository coordinates on the code host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Custom host (None for github.com)
    pub host: Option<String>,
}

/// PR state (open, closed, merged)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrState {
    /// PR is open
    Open,
    /// PR was closed without merging
    Closed,
    /// PR was merged
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Aggregate CI status of a PR head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckState {
    /// All checks passed
    Passing,
    /// Some checks still running
    Pending,
    /// At least one check failed
    Failing,
    /// No checks reported
    Missing,
}

/// Review status of a PR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    /// Approved by required reviewers
    Approved,
    /// A reviewer requested changes
    ChangesRequested,
    /// Review required but not yet given
    ReviewRequired,
    /// Repository has no review requirement and nobody reviewed
    None,
}

/// Snapshot of check and approval status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStatus {
    /// CI status
    pub checks: CheckState,
    /// Review status
    pub review: ReviewState,
    /// Whether the PR can be merged (no conflicts)
    /// - `Some(true)` = mergeable
    /// - `Some(false)` = has conflicts
    /// - `None` = unknown (GitHub still computing)
    pub mergeable: Option<bool>,
    /// Whether the PR is a draft
    pub is_draft: bool,
}

impl Default for PrStatus {
    fn default() -> Self {
        Self {
            checks: CheckState::Missing,
            review: ReviewState::None,
            mergeable: None,
            is_draft: false,
        }
    }
}

/// Remote counterpart of one stack entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    /// PR number
    pub number: u64,
    /// Commit-id encoded in the head branch name
    pub commit_id: CommitId,
    /// Head branch name
    pub head_branch: String,
    /// Base branch name
    pub base_branch: String,
    /// Commit the head branch points at
    pub head_commit: String,
    /// PR title
    pub title: String,
    /// Open / closed / merged
    pub state: PrState,
    /// Check and approval snapshot
    pub status: PrStatus,
    /// Web URL for the PR
    pub html_url: String,
}

/// Result of a merge operation
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}

/// Merge strategy/method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Squash all commits into one
    #[default]
    Squash,
    /// Create a merge commit
    Merge,
    /// Rebase commits onto base branch
    Rebase,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Squash => write!(f, "squash"),
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
        }
    }
}
