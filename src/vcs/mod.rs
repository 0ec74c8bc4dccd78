//! Version control provider
//!
//! The core never talks to git directly. Everything it needs from the local
//! repository goes through [`VersionControl`], which keeps the reconciler and
//! the analyzer testable against an in-memory repository.

mod git;

pub use git::GitCli;

use crate::error::Result;
use crate::types::CommitId;
use async_trait::async_trait;

/// A commit as read from the repository, before commit-id processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    /// Commit hash (hex)
    pub hash: String,
    /// Full commit message
    pub message: String,
}

/// Handle to an isolated, disposable checkout
///
/// Created by [`VersionControl::create_scratch_checkout`] and released with
/// [`VersionControl::discard`]. Cherry-picks only ever happen here, never in
/// the user's working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchHandle {
    key: String,
    base: String,
}

impl ScratchHandle {
    /// Create a handle; `key` is provider-defined (e.g. a worktree path)
    pub fn new(key: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base: base.into(),
        }
    }

    /// Provider-defined identity of the checkout
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolved commit the checkout resets to
    pub fn base(&self) -> &str {
        &self.base
    }
}

/// Outcome of a trial cherry-pick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPick {
    /// Applied cleanly; the scratch head is now `commit`
    Applied {
        /// New head of the scratch checkout
        commit: String,
    },
    /// Did not apply; the scratch checkout is left at its previous head
    Conflict,
}

impl CherryPick {
    /// Whether the pick applied
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Local repository operations consumed by the core
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commits in `base..tip`, oldest first
    async fn resolve_range(&self, base: &str, tip: &str) -> Result<Vec<RawCommit>>;

    /// Whether `ancestor` is reachable from `descendant`
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Read the commit-id trailer from a commit message
    fn read_trailer(&self, commit: &RawCommit) -> Option<CommitId> {
        crate::stack::parse_trailer(&commit.message)
    }

    /// Append the commit-id trailer to `commit`'s message in place.
    ///
    /// Rewrites `commit` and everything above it up to `tip`, then moves
    /// `tip` (a branch or `HEAD`) to the rewritten history. The order of
    /// commits and the final tree are unchanged.
    async fn amend_trailer(&self, tip: &str, commit: &str, id: &CommitId) -> Result<()>;

    /// Create an isolated checkout of `base`
    async fn create_scratch_checkout(&self, base: &str) -> Result<ScratchHandle>;

    /// Move the checkout to `commit`, dropping any picked commits and
    /// aborting an unfinished pick
    async fn move_scratch(&self, handle: &ScratchHandle, commit: &str) -> Result<()>;

    /// Put the checkout back at its base
    async fn reset_scratch(&self, handle: &ScratchHandle) -> Result<()> {
        self.move_scratch(handle, handle.base()).await
    }

    /// Try to apply `commit` on top of the checkout's current head
    async fn cherry_pick(&self, handle: &ScratchHandle, commit: &str) -> Result<CherryPick>;

    /// Release the checkout
    async fn discard(&self, handle: ScratchHandle) -> Result<()>;
}
