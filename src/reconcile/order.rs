//! Safe ordering of remote operations
//!
//! GitHub closes a PR as merged as soon as its head commit shows up in the
//! history of its base branch. Pushing stack branches in the wrong order can
//! trip that on a sibling that has not been updated yet, so the order is
//! computed explicitly:
//!
//! 1. Closes run first.
//! 2. A PR is created or repointed at branch `Q` only after `Q`'s own head
//!    has been pushed.
//! 3. A PR's head is pushed before its base is repointed.
//! 4. If PR `P` currently sits on branch `Z` and `P` lands below `Z` in the
//!    new stack, `P` is repointed before `Z`'s head is pushed (the new `Z`
//!    contains `P`).
//!
//! The constraints are sorted topologically, lowest stack position first,
//! and the result is replayed against a model of branch histories. Any cycle
//! or unsafe intermediate state fails the whole plan.

use crate::error::{Error, Result};
use crate::platform::BranchNaming;
use crate::reconcile::plan::{PlannedOp, RemoteOp, TargetEntry};
use crate::types::{CommitId, PullRequestRecord};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// Stack positions and branch ownership of the target forest
struct Layout<'a> {
    targets: &'a [TargetEntry],
    position: HashMap<&'a CommitId, usize>,
    owner: HashMap<String, usize>,
    branches: Vec<String>,
}

impl<'a> Layout<'a> {
    fn new(targets: &'a [TargetEntry], naming: &BranchNaming) -> Self {
        let position = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (&t.commit_id, i))
            .collect();
        let branches: Vec<String> = targets
            .iter()
            .map(|t| naming.branch_for(&t.commit_id))
            .collect();
        let owner = branches
            .iter()
            .enumerate()
            .map(|(i, b)| (b.clone(), i))
            .collect();
        Self {
            targets,
            position,
            owner,
            branches,
        }
    }

    fn parent(&self, i: usize) -> Option<usize> {
        self.targets[i]
            .parent
            .as_ref()
            .and_then(|p| self.position.get(p).copied())
    }

    /// Whether `a` is a strict ancestor of `b` in the target forest
    fn is_ancestor(&self, a: usize, b: usize) -> bool {
        let mut cur = self.parent(b);
        while let Some(p) = cur {
            if p == a {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    /// Target index of the entry an operation belongs to
    fn entry_of(&self, op: &RemoteOp) -> Option<usize> {
        self.position.get(op.commit_id()).copied()
    }
}

fn priority(layout: &Layout<'_>, op: &RemoteOp) -> (u8, usize, u8) {
    match op {
        RemoteOp::ClosePr { number, .. } => {
            (0, usize::try_from(*number).unwrap_or(usize::MAX), 0)
        }
        RemoteOp::CreatePr { .. } | RemoteOp::UpdateHead { .. } => {
            (1, layout.entry_of(op).unwrap_or(usize::MAX), 0)
        }
        RemoteOp::UpdateBase { .. } => (1, layout.entry_of(op).unwrap_or(usize::MAX), 1),
    }
}

/// Compute prerequisite edges between operations
fn constraints(
    ops: &[RemoteOp],
    layout: &Layout<'_>,
    matched: &HashMap<CommitId, PullRequestRecord>,
) -> Vec<BTreeSet<usize>> {
    let n = layout.targets.len();
    let mut head_op: Vec<Option<usize>> = vec![None; n];
    let mut base_op: Vec<Option<usize>> = vec![None; n];
    for (idx, op) in ops.iter().enumerate() {
        let Some(entry) = layout.entry_of(op) else {
            continue;
        };
        match op {
            RemoteOp::CreatePr { .. } | RemoteOp::UpdateHead { .. } => head_op[entry] = Some(idx),
            RemoteOp::UpdateBase { .. } => base_op[entry] = Some(idx),
            RemoteOp::ClosePr { .. } => {}
        }
    }

    let mut after: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ops.len()];

    for (idx, op) in ops.iter().enumerate() {
        let new_base = match op {
            RemoteOp::CreatePr { base_branch, .. } => base_branch,
            RemoteOp::UpdateBase { new_base, .. } => new_base,
            _ => continue,
        };
        // Base branch must carry its new head first
        if let Some(&q) = layout.owner.get(new_base)
            && let Some(h) = head_op[q]
        {
            after[idx].insert(h);
        }
    }

    for entry in 0..n {
        // Own content before repointing
        if let (Some(h), Some(b)) = (head_op[entry], base_op[entry]) {
            after[b].insert(h);
        }

        // Leave a branch before it grows to contain us
        let Some(record) = matched.get(&layout.targets[entry].commit_id) else {
            continue;
        };
        if let Some(&z) = layout.owner.get(&record.base_branch)
            && z != entry
            && layout.is_ancestor(entry, z)
            && let (Some(b), Some(zh)) = (base_op[entry], head_op[z])
        {
            after[zh].insert(b);
        }
    }

    after
}

/// Kahn's algorithm, lowest priority value first
fn topo_sort(ops: &[RemoteOp], after: &[BTreeSet<usize>], layout: &Layout<'_>) -> Result<Vec<usize>> {
    let mut indegree: Vec<usize> = after.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (idx, prereqs) in after.iter().enumerate() {
        for &p in prereqs {
            dependents[p].push(idx);
        }
    }

    let mut ready: BinaryHeap<Reverse<((u8, usize, u8), usize)>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(idx, _)| Reverse((priority(layout, &ops[idx]), idx)))
        .collect();

    let mut order = Vec::with_capacity(ops.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);
        for &d in &dependents[idx] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.push(Reverse((priority(layout, &ops[d]), d)));
            }
        }
    }

    if order.len() < ops.len() {
        let stuck: Vec<String> = (0..ops.len())
            .filter(|idx| !order.contains(idx))
            .map(|idx| ops[idx].to_string())
            .collect();
        return Err(Error::ReconciliationImpossible(format!(
            "cyclic ordering constraints between: {}",
            stuck.join("; ")
        )));
    }
    Ok(order)
}

/// Model of branch heads and commit histories used to verify an order
struct Simulation<'a> {
    layout: &'a Layout<'a>,
    /// Current head commit per target branch
    heads: Vec<Option<String>>,
    /// Current base branch per open PR, by target index
    bases: HashMap<usize, String>,
    /// Commits reachable from a known head commit
    history: HashMap<String, HashSet<String>>,
}

impl<'a> Simulation<'a> {
    fn new(layout: &'a Layout<'a>, matched: &HashMap<CommitId, PullRequestRecord>) -> Result<Self> {
        let n = layout.targets.len();
        let mut heads = vec![None; n];
        let mut bases = HashMap::new();
        let mut records: Vec<Option<&PullRequestRecord>> = vec![None; n];
        for (i, target) in layout.targets.iter().enumerate() {
            if let Some(record) = matched.get(&target.commit_id) {
                heads[i] = Some(record.head_commit.clone());
                bases.insert(i, record.base_branch.clone());
                records[i] = Some(record);
            }
        }

        let mut history: HashMap<String, HashSet<String>> = HashMap::new();

        // Current heads follow current base pointers
        for start in 0..n {
            let Some(record) = records[start] else {
                continue;
            };
            let mut set = HashSet::new();
            let mut seen = HashSet::new();
            let mut cur = Some(start);
            while let Some(i) = cur {
                if !seen.insert(i) {
                    return Err(Error::ReconciliationImpossible(format!(
                        "PR #{} has a cyclic chain of base branches",
                        record.number
                    )));
                }
                let Some(r) = records[i] else { break };
                set.insert(r.head_commit.clone());
                cur = layout.owner.get(&r.base_branch).copied();
            }
            history.insert(record.head_commit.clone(), set);
        }

        // New heads follow the target forest
        for start in 0..n {
            let mut set = HashSet::new();
            let mut cur = Some(start);
            while let Some(i) = cur {
                set.insert(layout.targets[i].head_commit.clone());
                cur = layout.parent(i);
            }
            history.insert(layout.targets[start].head_commit.clone(), set);
        }

        Ok(Self {
            layout,
            heads,
            bases,
            history,
        })
    }

    fn contains(&self, tip: &str, commit: &str) -> bool {
        self.history
            .get(tip)
            .map_or(tip == commit, |set| set.contains(commit))
    }

    /// Open PRs whose head is already in their base branch
    fn exposed(&self) -> HashSet<usize> {
        self.bases
            .iter()
            .filter_map(|(&i, base)| {
                let head = self.heads[i].as_ref()?;
                let &q = self.layout.owner.get(base)?;
                let base_head = self.heads[q].as_ref()?;
                self.contains(base_head, head).then_some(i)
            })
            .collect()
    }

    fn base_exists(&self, branch: &str) -> bool {
        self.layout
            .owner
            .get(branch)
            .is_none_or(|&q| self.heads[q].is_some())
    }

    fn apply(&mut self, op: &RemoteOp) -> Result<()> {
        let entry = self.layout.entry_of(op);
        let before = self.exposed();

        match (op, entry) {
            (RemoteOp::ClosePr { .. }, _) => return Ok(()),
            (
                RemoteOp::CreatePr {
                    base_branch,
                    head_commit,
                    ..
                },
                Some(i),
            ) => {
                if !self.base_exists(base_branch) {
                    return Err(Error::ReconciliationImpossible(format!(
                        "{op}: base branch {base_branch} does not exist yet"
                    )));
                }
                self.heads[i] = Some(head_commit.clone());
                self.bases.insert(i, base_branch.clone());
            }
            (RemoteOp::UpdateHead { new_commit, .. }, Some(i)) => {
                self.heads[i] = Some(new_commit.clone());
            }
            (RemoteOp::UpdateBase { new_base, .. }, Some(i)) => {
                if !self.base_exists(new_base) {
                    return Err(Error::ReconciliationImpossible(format!(
                        "{op}: base branch {new_base} does not exist yet"
                    )));
                }
                self.bases.insert(i, new_base.clone());
            }
            _ => {
                return Err(Error::Internal(format!(
                    "operation for unknown stack entry: {op}"
                )));
            }
        }

        let after = self.exposed();
        if let Some(&victim) = after.difference(&before).next() {
            let base = self.bases.get(&victim).map_or("?", String::as_str);
            return Err(Error::ReconciliationImpossible(format!(
                "{op} would put {}'s head into the history of {base}",
                self.layout.branches[victim]
            )));
        }
        Ok(())
    }
}

/// Order operations so that no open PR is exposed to auto-merge detection.
///
/// `matched` holds the open PR for each target that has one.
pub fn order_operations(
    ops: Vec<RemoteOp>,
    targets: &[TargetEntry],
    matched: &HashMap<CommitId, PullRequestRecord>,
    naming: &BranchNaming,
) -> Result<Vec<PlannedOp>> {
    let layout = Layout::new(targets, naming);
    let after = constraints(&ops, &layout, matched);
    let order = topo_sort(&ops, &after, &layout)?;

    let mut sim = Simulation::new(&layout, matched)?;
    for &idx in &order {
        sim.apply(&ops[idx])?;
    }

    let mut new_index = vec![0; ops.len()];
    for (pos, &idx) in order.iter().enumerate() {
        new_index[idx] = pos;
    }

    let mut slots: Vec<Option<RemoteOp>> = ops.into_iter().map(Some).collect();
    let planned: Vec<PlannedOp> = order
        .iter()
        .filter_map(|&idx| {
            let op = slots[idx].take()?;
            let mut prereqs: Vec<usize> = after[idx].iter().map(|&p| new_index[p]).collect();
            prereqs.sort_unstable();
            Some(PlannedOp { op, after: prereqs })
        })
        .collect();

    debug!(ops = planned.len(), "ordered remote operations");
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrState, PrStatus};

    fn id(n: u8) -> CommitId {
        CommitId::parse(&format!("{n:08x}")).unwrap()
    }

    fn naming() -> BranchNaming {
        BranchNaming::new("spr", "main")
    }

    fn target(n: u8, parent: Option<u8>, head: &str) -> TargetEntry {
        TargetEntry {
            commit_id: id(n),
            head_commit: head.to_string(),
            parent: parent.map(id),
            title: format!("commit {n}"),
            body: String::new(),
        }
    }

    fn record(n: u8, number: u64, base: Option<u8>, head: &str) -> PullRequestRecord {
        PullRequestRecord {
            number,
            commit_id: id(n),
            head_branch: naming().branch_for(&id(n)),
            base_branch: base.map_or_else(|| "main".to_string(), |b| naming().branch_for(&id(b))),
            head_commit: head.to_string(),
            title: format!("commit {n}"),
            state: PrState::Open,
            status: PrStatus::default(),
            html_url: String::new(),
        }
    }

    fn update_head(n: u8, number: u64, head: &str) -> RemoteOp {
        RemoteOp::UpdateHead {
            number,
            commit_id: id(n),
            head_branch: naming().branch_for(&id(n)),
            new_commit: head.to_string(),
        }
    }

    fn update_base(n: u8, number: u64, base: u8) -> RemoteOp {
        RemoteOp::UpdateBase {
            number,
            commit_id: id(n),
            new_base: naming().branch_for(&id(base)),
        }
    }

    fn matched(records: Vec<PullRequestRecord>) -> HashMap<CommitId, PullRequestRecord> {
        records.into_iter().map(|r| (r.commit_id.clone(), r)).collect()
    }

    #[test]
    fn test_swap_moves_lower_entry_first() {
        // A,B,C -> A,C,B
        let targets = vec![
            target(1, None, "a1"),
            target(3, Some(1), "c2"),
            target(2, Some(3), "b2"),
        ];
        let matched = matched(vec![
            record(1, 10, None, "a1"),
            record(2, 11, Some(1), "b1"),
            record(3, 12, Some(2), "c1"),
        ]);
        // Deliberately scrambled input order
        let ops = vec![
            update_base(2, 11, 3),
            update_head(2, 11, "b2"),
            update_base(3, 12, 1),
            update_head(3, 12, "c2"),
        ];

        let planned = order_operations(ops, &targets, &matched, &naming()).unwrap();
        let order: Vec<RemoteOp> = planned.iter().map(|p| p.op.clone()).collect();
        assert_eq!(
            order,
            vec![
                update_head(3, 12, "c2"),
                update_base(3, 12, 1),
                update_head(2, 11, "b2"),
                update_base(2, 11, 3),
            ]
        );
        // B's head waits for C's repoint
        assert_eq!(planned[2].after, vec![1]);
    }

    #[test]
    fn test_head_only_updates_keep_stack_order() {
        let targets = vec![
            target(1, None, "a2"),
            target(2, Some(1), "b2"),
            target(3, Some(2), "c2"),
        ];
        let matched = matched(vec![
            record(1, 10, None, "a1"),
            record(2, 11, Some(1), "b1"),
            record(3, 12, Some(2), "c1"),
        ]);
        let ops = vec![
            update_head(3, 12, "c2"),
            update_head(1, 10, "a2"),
            update_head(2, 11, "b2"),
        ];
        let planned = order_operations(ops, &targets, &matched, &naming()).unwrap();
        let heads: Vec<u64> = planned.iter().filter_map(|p| p.op.pr_number()).collect();
        assert_eq!(heads, vec![10, 11, 12]);
        assert!(planned.iter().all(|p| p.after.is_empty()));
    }

    #[test]
    fn test_cyclic_current_bases_fail_closed() {
        let targets = vec![target(1, None, "a2"), target(2, Some(1), "b2")];
        let matched = matched(vec![
            record(1, 10, Some(2), "a1"),
            record(2, 11, Some(1), "b1"),
        ]);
        let ops = vec![
            update_head(1, 10, "a2"),
            RemoteOp::UpdateBase {
                number: 10,
                commit_id: id(1),
                new_base: "main".to_string(),
            },
            update_head(2, 11, "b2"),
        ];
        let err = order_operations(ops, &targets, &matched, &naming()).unwrap_err();
        assert!(matches!(err, Error::ReconciliationImpossible(_)));
    }

    #[test]
    fn test_exposing_unchanged_sibling_fails_closed() {
        // B sits on C's branch, and C's (unchanged) head already contains B's
        // new head: pushing B would mark it merged.
        let targets = vec![target(2, None, "b2"), target(3, Some(2), "c2")];
        let matched = matched(vec![record(2, 11, Some(3), "b1"), record(3, 12, None, "c2")]);
        let ops = vec![
            update_head(2, 11, "b2"),
            RemoteOp::UpdateBase {
                number: 11,
                commit_id: id(2),
                new_base: "main".to_string(),
            },
            update_base(3, 12, 2),
        ];
        let err = order_operations(ops, &targets, &matched, &naming()).unwrap_err();
        assert!(matches!(err, Error::ReconciliationImpossible(_)));
    }
}
