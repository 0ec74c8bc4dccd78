//! Breakup - turning analyzer output into separate PR chains
//!
//! Each forest node gets its own head commit, built in the scratch checkout
//! on top of its parent's head (or the base). Prerequisites the parent's head
//! lacks (the forest keeps one parent per node) are replayed first, so they
//! show up in that node's PR too. The result is a target forest the
//! reconciler can submit directly.

use crate::analyze::{Analysis, Dependency, acquire_scratch, release_scratch};
use crate::error::Result;
use crate::reconcile::TargetEntry;
use crate::types::{CommitEntry, CommitId};
use crate::vcs::{CherryPick, ScratchHandle, VersionControl};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// How commits are grouped into PRs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakupMode {
    /// One stack per dependency tree; SCC members chained in stack order
    #[default]
    Stacks,
    /// Only independent commits, each as its own PR on the base branch
    Independent,
    /// One linear stack of every commit that takes part in a dependency,
    /// in stack order; commits with no link to any other are left out
    SingleStack,
}

/// A commit that did not get a PR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCommit {
    /// Commit-id
    pub commit_id: CommitId,
    /// Subject line
    pub subject: String,
    /// Why it was skipped
    pub reason: String,
}

/// Materialised breakup, ready for reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakupPlan {
    /// Targets, parents before children
    pub targets: Vec<TargetEntry>,
    /// Commits left out
    pub skipped: Vec<SkippedCommit>,
}

/// Build head commits for every PR of the breakup (EFFECTFUL, scratch only)
///
/// `entries` and `analysis` must describe the same stack.
pub async fn materialize_breakup(
    vcs: &dyn VersionControl,
    base: &str,
    entries: &[CommitEntry],
    analysis: &Analysis,
    mode: BreakupMode,
    timeout: Duration,
) -> Result<BreakupPlan> {
    let handle = acquire_scratch(vcs, base).await?;
    let result = match mode {
        BreakupMode::Stacks => build_stacks(vcs, &handle, entries, analysis, timeout).await,
        BreakupMode::Independent => {
            build_independent(vcs, &handle, entries, analysis, timeout).await
        }
        BreakupMode::SingleStack => {
            build_single_stack(vcs, &handle, entries, analysis, timeout).await
        }
    };
    release_scratch(vcs, handle, result).await
}

/// Pick `commits` on top of `onto`; heads after each pick, `None` on conflict
async fn pick_chain(
    vcs: &dyn VersionControl,
    handle: &ScratchHandle,
    onto: &str,
    commits: &[&str],
    timeout: Duration,
) -> Result<Option<Vec<String>>> {
    let replay = async {
        vcs.move_scratch(handle, onto).await?;
        let mut heads = Vec::with_capacity(commits.len());
        for commit in commits {
            match vcs.cherry_pick(handle, commit).await? {
                CherryPick::Applied { commit } => heads.push(commit),
                CherryPick::Conflict => return Ok(None),
            }
        }
        Ok(Some(heads))
    };
    match tokio::time::timeout(timeout, replay).await {
        Ok(result) => result,
        Err(_) => {
            warn!(onto, "materialising chain timed out");
            Ok(None)
        }
    }
}

async fn build_stacks(
    vcs: &dyn VersionControl,
    handle: &ScratchHandle,
    entries: &[CommitEntry],
    analysis: &Analysis,
    timeout: Duration,
) -> Result<BreakupPlan> {
    let forest = analysis.graph.forest();
    let mut plan = BreakupPlan::default();
    // Forest node -> (head commit, commit-id) of its last member
    let mut tips: HashMap<usize, (String, CommitId)> = HashMap::new();
    // Forest node -> stack positions its materialised head contains
    let mut contains: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); forest.nodes.len()];
    let mut failed: Vec<bool> = vec![false; forest.nodes.len()];

    for (n, node) in forest.nodes.iter().enumerate() {
        let members: Vec<&CommitEntry> = node.members.iter().map(|&m| &entries[m]).collect();

        let parent_tip = match node.parent {
            Some(p) if failed[p] => {
                failed[n] = true;
                skip_all(&mut plan, &members, "a prerequisite could not be materialised");
                continue;
            }
            Some(p) => tips.get(&p).cloned(),
            None => None,
        };
        let mut inherited = node
            .parent
            .map(|p| contains[p].clone())
            .unwrap_or_default();

        // Prerequisites off the parent chain are replayed below the members
        let extra: Vec<usize> = analysis
            .graph
            .closure(&node.members)
            .into_iter()
            .filter(|p| !inherited.contains(p) && !node.members.contains(p))
            .collect();
        if !extra.is_empty() {
            debug!(node = n, ?extra, "replaying prerequisites outside the parent chain");
        }

        let onto = parent_tip.as_ref().map_or(handle.base(), |(h, _)| h.as_str());
        let hashes: Vec<&str> = extra
            .iter()
            .map(|&p| entries[p].hash.as_str())
            .chain(members.iter().map(|e| e.hash.as_str()))
            .collect();
        let Some(heads) = pick_chain(vcs, handle, onto, &hashes, timeout).await? else {
            failed[n] = true;
            skip_all(&mut plan, &members, "does not apply on its prerequisites");
            continue;
        };
        let heads = &heads[extra.len()..];

        let mut parent = parent_tip.map(|(_, id)| id);
        for (entry, head) in members.iter().zip(heads) {
            let mut target = TargetEntry::from_commit(entry, parent.take());
            target.head_commit.clone_from(head);
            debug!(commit_id = %entry.commit_id, head, "materialised breakup entry");
            parent = Some(entry.commit_id.clone());
            plan.targets.push(target);
        }
        if let (Some(last), Some(head)) = (members.last(), heads.last()) {
            tips.insert(n, (head.clone(), last.commit_id.clone()));
        }
        inherited.extend(extra);
        inherited.extend(node.members.iter().copied());
        contains[n] = inherited;
    }

    Ok(plan)
}

async fn build_independent(
    vcs: &dyn VersionControl,
    handle: &ScratchHandle,
    entries: &[CommitEntry],
    analysis: &Analysis,
    timeout: Duration,
) -> Result<BreakupPlan> {
    let mut plan = BreakupPlan::default();

    for (entry, verdict) in entries.iter().zip(&analysis.commits) {
        if !matches!(verdict.dependency, Dependency::Independent) {
            skip_all(&mut plan, &[entry], "depends on earlier commits");
            continue;
        }
        let Some(heads) = pick_chain(vcs, handle, handle.base(), &[&entry.hash], timeout).await?
        else {
            skip_all(&mut plan, &[entry], "does not apply on the base");
            continue;
        };
        let mut target = TargetEntry::from_commit(entry, None);
        if let Some(head) = heads.into_iter().next() {
            target.head_commit = head;
        }
        plan.targets.push(target);
    }

    Ok(plan)
}

async fn build_single_stack(
    vcs: &dyn VersionControl,
    handle: &ScratchHandle,
    entries: &[CommitEntry],
    analysis: &Analysis,
    timeout: Duration,
) -> Result<BreakupPlan> {
    let chain = analysis.graph.connected();
    let mut plan = BreakupPlan::default();
    let mut tip: Option<(String, CommitId)> = None;
    let mut broken = false;

    for (position, entry) in entries.iter().enumerate() {
        if !chain.contains(&position) {
            skip_all(&mut plan, &[entry], "independent of the rest of the stack");
            continue;
        }
        if broken {
            skip_all(&mut plan, &[entry], "a prerequisite could not be materialised");
            continue;
        }
        let onto = tip.as_ref().map_or(handle.base(), |(h, _)| h.as_str());
        let Some(heads) = pick_chain(vcs, handle, onto, &[&entry.hash], timeout).await? else {
            broken = true;
            skip_all(&mut plan, &[entry], "does not apply on its prerequisites");
            continue;
        };
        let mut target = TargetEntry::from_commit(entry, tip.take().map(|(_, id)| id));
        if let Some(head) = heads.into_iter().next() {
            target.head_commit = head;
        }
        tip = Some((target.head_commit.clone(), entry.commit_id.clone()));
        plan.targets.push(target);
    }

    Ok(plan)
}

impl BreakupPlan {
    /// Keep only the PRs for `ids` and the chains below them.
    ///
    /// A kept target's parent is kept too, since its branch is the PR's base.
    /// Returns the commit-ids whose targets were dropped.
    pub fn restrict_to(&mut self, ids: &HashSet<CommitId>) -> Vec<CommitId> {
        let parents: HashMap<CommitId, Option<CommitId>> = self
            .targets
            .iter()
            .map(|t| (t.commit_id.clone(), t.parent.clone()))
            .collect();
        let mut keep: HashSet<CommitId> = HashSet::new();
        for id in ids {
            let mut cur = parents.contains_key(id).then(|| id.clone());
            while let Some(c) = cur {
                if !keep.insert(c.clone()) {
                    break;
                }
                cur = parents.get(&c).cloned().flatten();
            }
        }
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.targets)
            .into_iter()
            .partition(|t| keep.contains(&t.commit_id));
        self.targets = kept;
        dropped.into_iter().map(|t| t.commit_id).collect()
    }
}

fn skip_all(plan: &mut BreakupPlan, members: &[&CommitEntry], reason: &str) {
    plan.skipped.extend(members.iter().map(|e| SkippedCommit {
        commit_id: e.commit_id.clone(),
        subject: e.subject.clone(),
        reason: reason.to_string(),
    }));
}
