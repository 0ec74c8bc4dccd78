//! Reconcile planning - matching the local stack against open PRs
//!
//! Pure except for [`gather_remote_state`]. Matching is by commit-id only;
//! branch names and hashes change on every amend.

use crate::config::DisappearedPolicy;
use crate::error::{Error, Result};
use crate::platform::{BranchNaming, PlatformService};
use crate::reconcile::order::order_operations;
use crate::retry::{RetryPolicy, with_retry};
use crate::types::{CommitEntry, CommitId, PullRequestRecord};
use crate::vcs::VersionControl;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Comment left on a PR whose commit was dropped from the stack
pub const GONE_AWAY_COMMENT: &str = "Closing pull request: commit has gone away";

/// Where one stack entry should end up remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    /// Join key with the remote PR
    pub commit_id: CommitId,
    /// Commit the head branch should point at
    pub head_commit: String,
    /// Entry whose branch is this PR's base; `None` means the root base branch
    pub parent: Option<CommitId>,
    /// Title used when the PR is created
    pub title: String,
    /// Body used when the PR is created
    pub body: String,
}

impl TargetEntry {
    /// Target for a local commit
    pub fn from_commit(entry: &CommitEntry, parent: Option<CommitId>) -> Self {
        Self {
            commit_id: entry.commit_id.clone(),
            head_commit: entry.hash.clone(),
            parent,
            title: entry.subject.clone(),
            body: entry.pr_body(),
        }
    }
}

/// Linear chain: each entry's base is the one below it
pub fn linear_targets(entries: &[CommitEntry]) -> Vec<TargetEntry> {
    let mut parent = None;
    entries
        .iter()
        .map(|entry| {
            let target = TargetEntry::from_commit(entry, parent.take());
            parent = Some(entry.commit_id.clone());
            target
        })
        .collect()
}

/// Remote side of a reconciliation, fetched before planning
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    /// Open stack PRs for the base branch
    pub records: Vec<PullRequestRecord>,
    /// PR numbers whose head is already part of the base branch
    pub landed: HashSet<u64>,
}

/// Fetch open PRs and find which orphaned ones already landed (EFFECTFUL)
pub async fn gather_remote_state(
    platform: &dyn PlatformService,
    vcs: &dyn VersionControl,
    naming: &BranchNaming,
    base_ref: &str,
    targets: &[TargetEntry],
    retry: &RetryPolicy,
) -> Result<RemoteState> {
    let records = with_retry(retry, "list open pull requests", || {
        platform.list_open_pull_requests(naming)
    })
    .await?;

    let wanted: HashSet<&CommitId> = targets.iter().map(|t| &t.commit_id).collect();
    let mut landed = HashSet::new();
    for record in records.iter().filter(|r| !wanted.contains(&r.commit_id)) {
        match vcs.is_ancestor(&record.head_commit, base_ref).await {
            Ok(true) => {
                landed.insert(record.number);
            }
            Ok(false) => {}
            Err(e) => {
                // Head not available locally; it cannot be in base either
                warn!(pr_number = record.number, error = %e, "could not check if PR landed");
            }
        }
    }

    debug!(
        records = records.len(),
        landed = landed.len(),
        "gathered remote state"
    );
    Ok(RemoteState { records, landed })
}

/// A single remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// Push the head branch, then open a PR
    CreatePr {
        /// Commit-id of the entry
        commit_id: CommitId,
        /// Head branch to push and open from
        head_branch: String,
        /// Base branch
        base_branch: String,
        /// Commit to push
        head_commit: String,
        /// PR title
        title: String,
        /// PR body
        body: String,
    },
    /// Force-push a PR's head branch
    UpdateHead {
        /// PR number
        number: u64,
        /// Commit-id of the entry
        commit_id: CommitId,
        /// Head branch
        head_branch: String,
        /// New head commit
        new_commit: String,
    },
    /// Repoint a PR's base branch
    UpdateBase {
        /// PR number
        number: u64,
        /// Commit-id of the entry
        commit_id: CommitId,
        /// New base branch
        new_base: String,
    },
    /// Comment on and close a PR
    ClosePr {
        /// PR number
        number: u64,
        /// Commit-id of the PR
        commit_id: CommitId,
        /// Comment posted before closing
        comment: String,
    },
}

impl RemoteOp {
    /// Commit-id the operation concerns
    pub const fn commit_id(&self) -> &CommitId {
        match self {
            Self::CreatePr { commit_id, .. }
            | Self::UpdateHead { commit_id, .. }
            | Self::UpdateBase { commit_id, .. }
            | Self::ClosePr { commit_id, .. } => commit_id,
        }
    }

    /// PR number, if the PR already exists
    pub const fn pr_number(&self) -> Option<u64> {
        match self {
            Self::CreatePr { .. } => None,
            Self::UpdateHead { number, .. }
            | Self::UpdateBase { number, .. }
            | Self::ClosePr { number, .. } => Some(*number),
        }
    }

    /// Whether the operation moves a head branch
    pub const fn moves_head(&self) -> bool {
        matches!(self, Self::CreatePr { .. } | Self::UpdateHead { .. })
    }
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreatePr {
                head_branch,
                base_branch,
                title,
                ..
            } => write!(f, "create PR for {head_branch} → {base_branch}: {title}"),
            Self::UpdateHead {
                number, new_commit, ..
            } => {
                let short = new_commit.get(..8).unwrap_or(new_commit);
                write!(f, "update PR #{number} head to {short}")
            }
            Self::UpdateBase {
                number, new_base, ..
            } => write!(f, "update PR #{number} base to {new_base}"),
            Self::ClosePr { number, .. } => write!(f, "close PR #{number}"),
        }
    }
}

/// An operation plus the operations that must succeed before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOp {
    /// The operation
    pub op: RemoteOp,
    /// Indices (into the plan) of direct prerequisites
    pub after: Vec<usize>,
}

/// Something noticed about a PR that needs no operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Head and base already match
    Unchanged {
        /// PR number
        number: u64,
        /// Commit-id
        commit_id: CommitId,
    },
    /// Commit left the stack because it is already in the base branch
    Landed {
        /// PR number
        number: u64,
        /// Commit-id
        commit_id: CommitId,
    },
    /// Commit left the stack without landing; PR kept open by policy
    Abandoned {
        /// PR number
        number: u64,
        /// Commit-id
        commit_id: CommitId,
    },
}

/// Options for reconcile planning
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Head branch naming scheme (carries the root base branch)
    pub naming: BranchNaming,
    /// What to do with PRs whose commit vanished without landing
    pub disappeared_policy: DisappearedPolicy,
    /// Commit-ids still in the local stack but outside this submission
    /// (above `--count`, above a WIP commit, skipped by breakup). Their PRs
    /// are neither updated nor closed.
    pub leave_alone: HashSet<CommitId>,
}

impl ReconcileOptions {
    /// Options with nothing left alone
    pub fn new(naming: BranchNaming, disappeared_policy: DisappearedPolicy) -> Self {
        Self {
            naming,
            disappeared_policy,
            leave_alone: HashSet::new(),
        }
    }

    /// Leave the PRs of `ids` untouched
    #[must_use]
    pub fn leaving_alone(mut self, ids: impl IntoIterator<Item = CommitId>) -> Self {
        self.leave_alone.extend(ids);
        self
    }
}

/// Reconcile plan - the functional core output
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// Operations in execution order
    pub ops: Vec<PlannedOp>,
    /// PRs that need no operation
    pub observations: Vec<Observation>,
}

impl ReconcilePlan {
    /// Whether there is nothing to do remotely
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of PRs that will be created
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(|op| matches!(op, RemoteOp::CreatePr { .. }))
    }

    /// Number of head or base updates
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(|op| matches!(op, RemoteOp::UpdateHead { .. } | RemoteOp::UpdateBase { .. }))
    }

    /// Number of PRs that will be closed
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.count(|op| matches!(op, RemoteOp::ClosePr { .. }))
    }

    fn count(&self, pred: impl Fn(&RemoteOp) -> bool) -> usize {
        self.ops.iter().filter(|p| pred(&p.op)).count()
    }
}

fn check_targets(targets: &[TargetEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for target in targets {
        if let Some(parent) = &target.parent
            && !seen.contains(parent)
        {
            return Err(Error::Internal(format!(
                "target {} has parent {parent} that is not listed before it",
                target.commit_id
            )));
        }
        if !seen.insert(&target.commit_id) {
            return Err(Error::Internal(format!(
                "commit-id {} appears twice in targets",
                target.commit_id
            )));
        }
    }
    Ok(())
}

/// Create a reconcile plan (PURE - no I/O)
///
/// Targets must list parents before children. Fails with
/// [`Error::ReconciliationImpossible`] when no safe operation order exists.
pub fn create_reconcile_plan(
    targets: &[TargetEntry],
    remote: &RemoteState,
    options: &ReconcileOptions,
) -> Result<ReconcilePlan> {
    check_targets(targets)?;
    let naming = &options.naming;

    let wanted: HashSet<&CommitId> = targets.iter().map(|t| &t.commit_id).collect();
    let mut by_id: HashMap<&CommitId, Vec<&PullRequestRecord>> = HashMap::new();
    for record in remote
        .records
        .iter()
        .filter(|r| wanted.contains(&r.commit_id) || !options.leave_alone.contains(&r.commit_id))
    {
        by_id.entry(&record.commit_id).or_default().push(record);
    }

    let mut ops = Vec::new();
    let mut observations = Vec::new();
    let mut matched: HashMap<CommitId, PullRequestRecord> = HashMap::new();

    // Duplicates first: keep the oldest PR per commit-id
    let mut ids: Vec<&CommitId> = by_id.keys().copied().collect();
    ids.sort();
    for id in ids {
        let mut records = by_id[id].clone();
        records.sort_by_key(|r| r.number);
        let keep = records[0];
        for dup in &records[1..] {
            ops.push(RemoteOp::ClosePr {
                number: dup.number,
                commit_id: id.clone(),
                comment: format!(
                    "Closing duplicate pull request for commit-id {id}; #{} tracks it",
                    keep.number
                ),
            });
        }
        matched.insert(id.clone(), keep.clone());
    }

    let mut gone: Vec<&PullRequestRecord> = matched
        .values()
        .filter(|r| !wanted.contains(&r.commit_id))
        .collect();
    gone.sort_by_key(|r| r.number);
    for record in gone {
        let number = record.number;
        let commit_id = record.commit_id.clone();
        if remote.landed.contains(&number) {
            observations.push(Observation::Landed { number, commit_id });
        } else {
            match options.disappeared_policy {
                DisappearedPolicy::Close => ops.push(RemoteOp::ClosePr {
                    number,
                    commit_id,
                    comment: GONE_AWAY_COMMENT.to_string(),
                }),
                DisappearedPolicy::Keep => {
                    observations.push(Observation::Abandoned { number, commit_id });
                }
            }
        }
    }
    matched.retain(|id, _| wanted.contains(id));

    for target in targets {
        let head_branch = naming.branch_for(&target.commit_id);
        let base_branch = target
            .parent
            .as_ref()
            .map_or_else(|| naming.base().to_string(), |p| naming.branch_for(p));

        let Some(record) = matched.get(&target.commit_id) else {
            ops.push(RemoteOp::CreatePr {
                commit_id: target.commit_id.clone(),
                head_branch,
                base_branch,
                head_commit: target.head_commit.clone(),
                title: target.title.clone(),
                body: target.body.clone(),
            });
            continue;
        };

        let mut changed = false;
        if record.head_commit != target.head_commit {
            ops.push(RemoteOp::UpdateHead {
                number: record.number,
                commit_id: target.commit_id.clone(),
                head_branch: record.head_branch.clone(),
                new_commit: target.head_commit.clone(),
            });
            changed = true;
        }
        if record.base_branch != base_branch {
            ops.push(RemoteOp::UpdateBase {
                number: record.number,
                commit_id: target.commit_id.clone(),
                new_base: base_branch,
            });
            changed = true;
        }
        if !changed {
            observations.push(Observation::Unchanged {
                number: record.number,
                commit_id: target.commit_id.clone(),
            });
        }
    }

    let ops = order_operations(ops, targets, &matched, naming)?;
    debug!(
        ops = ops.len(),
        observations = observations.len(),
        "created reconcile plan"
    );
    Ok(ReconcilePlan { ops, observations })
}
