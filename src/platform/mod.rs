//! Code host access
//!
//! The reconciler and the merge orchestrator only see [`PlatformService`];
//! host quirks stay inside the implementation.

mod detection;
mod github;

pub use detection::{detect_platform, parse_repo_info};
pub use github::GitHubService;

use crate::error::Result;
use crate::types::{CommitId, MergeMethod, MergeResult, PlatformConfig, PullRequestRecord};
use async_trait::async_trait;

/// Naming scheme for stack head branches: `<prefix>/<base>/<commit-id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNaming {
    prefix: String,
    base: String,
}

impl BranchNaming {
    /// Scheme for stacks targeting `base`
    pub fn new(prefix: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            base: base.into(),
        }
    }

    /// Root base branch (e.g. `main`)
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Head branch for a commit-id
    pub fn branch_for(&self, id: &CommitId) -> String {
        format!("{}/{}/{id}", self.prefix, self.base)
    }

    /// Extract the commit-id from a head branch, if it follows the scheme
    pub fn parse(&self, branch: &str) -> Option<CommitId> {
        let rest = branch
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?;
        CommitId::parse(rest).ok()
    }

    /// Whether `branch` is a stack head branch for this base
    pub fn matches(&self, branch: &str) -> bool {
        self.parse(branch).is_some()
    }
}

/// Parameters for opening a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    /// Commit-id the PR tracks
    pub commit_id: CommitId,
    /// Head branch (already pushed)
    pub head_branch: String,
    /// Base branch
    pub base_branch: String,
    /// Commit the head branch points at
    pub head_commit: String,
    /// PR title
    pub title: String,
    /// PR description
    pub body: String,
}

/// Code host operations consumed by the core
///
/// Implementations report failures through [`crate::error::Error`] so the
/// caller can tell transient failures (retried) from permanent ones.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Open PRs whose head branch follows `naming`, keyed by their commit-id
    async fn list_open_pull_requests(&self, naming: &BranchNaming)
    -> Result<Vec<PullRequestRecord>>;

    /// Open a PR; the head branch must already exist on the remote
    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequestRecord>;

    /// Repoint a PR at a different base branch
    async fn update_pull_request_base(&self, number: u64, new_base: &str) -> Result<()>;

    /// Force the head branch to `new_commit` (creating it if needed)
    async fn update_pull_request_head(&self, head_branch: &str, new_commit: &str) -> Result<()>;

    /// Force several head branches at once.
    ///
    /// The default pushes them one by one; implementations that can push
    /// atomically should override this.
    async fn update_pull_request_heads(&self, updates: &[(String, String)]) -> Result<()> {
        for (branch, commit) in updates {
            self.update_pull_request_head(branch, commit).await?;
        }
        Ok(())
    }

    /// Leave a comment on a PR
    async fn comment_pull_request(&self, number: u64, body: &str) -> Result<()>;

    /// Close a PR without merging
    async fn close_pull_request(&self, number: u64) -> Result<()>;

    /// Ask `reviewers` (user logins) to review a PR
    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()>;

    /// Merge a PR with the specified method
    async fn merge_pull_request(&self, number: u64, method: MergeMethod) -> Result<MergeResult>;

    /// Add a PR to the merge queue
    async fn enqueue_for_merge_queue(&self, number: u64) -> Result<()>;

    /// Repository coordinates
    fn config(&self) -> &PlatformConfig;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_naming_round_trip() {
        let naming = BranchNaming::new("spr", "main");
        let id = CommitId::parse("0a1b2c3d").unwrap();
        let branch = naming.branch_for(&id);
        assert_eq!(branch, "spr/main/0a1b2c3d");
        assert_eq!(naming.parse(&branch), Some(id));
    }

    #[test]
    fn test_branch_naming_rejects_other_bases_and_shapes() {
        let naming = BranchNaming::new("spr", "main");
        assert!(!naming.matches("spr/develop/0a1b2c3d"));
        assert!(!naming.matches("spr/main/0a1b2c3"));
        assert!(!naming.matches("spr/main/0a1b2c3d/extra"));
        assert!(!naming.matches("feature/main/0a1b2c3d"));
        assert!(!naming.matches("main"));
    }

    #[test]
    fn test_branch_naming_base_with_slash() {
        let naming = BranchNaming::new("spr", "release/1.0");
        let id = CommitId::parse("deadbeef").unwrap();
        assert_eq!(naming.branch_for(&id), "spr/release/1.0/deadbeef");
        assert_eq!(naming.parse("spr/release/1.0/deadbeef"), Some(id));
    }
}
