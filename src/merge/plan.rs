//! Merge planning - pure functions for creating merge plans
//!
//! No I/O happens here. The caller gathers the open PRs, this module walks
//! the stack bottom-up and decides how far merging can safely go.

use crate::types::{
    CheckState, CommitEntry, CommitId, MergeMethod, PrState, PullRequestRecord, ReviewState,
};
use std::collections::HashMap;
use std::hash::BuildHasher;

/// Confidence level for a merge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeConfidence {
    /// All conditions verified - merge should succeed
    Certain,
    /// Some conditions unknown - merge may fail
    Uncertain(String),
}

/// A single step in the merge plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStep {
    /// Point the PR at the root base branch before it is merged
    RetargetBase {
        /// PR number
        pr_number: u64,
        /// New base branch
        new_base: String,
    },
    /// Merge this PR
    Merge {
        /// PR number
        pr_number: u64,
        /// PR title (for display)
        pr_title: String,
        /// Merge method to use
        method: MergeMethod,
        /// Confidence level for this merge
        confidence: MergeConfidence,
    },
    /// Hand this PR to the merge queue
    Enqueue {
        /// PR number
        pr_number: u64,
        /// PR title (for display)
        pr_title: String,
        /// Confidence level for this enqueue
        confidence: MergeConfidence,
    },
    /// This PR blocks the rest of the stack
    Skip {
        /// Subject of the stack entry
        subject: String,
        /// PR number, if the entry has an open PR
        pr_number: Option<u64>,
        /// Reasons why this PR cannot be merged
        reasons: Vec<String>,
    },
}

impl MergeStep {
    /// PR number this step touches
    pub const fn pr_number(&self) -> Option<u64> {
        match self {
            Self::RetargetBase { pr_number, .. }
            | Self::Merge { pr_number, .. }
            | Self::Enqueue { pr_number, .. } => Some(*pr_number),
            Self::Skip { pr_number, .. } => *pr_number,
        }
    }

    /// Whether this step lands (or queues) a PR
    pub const fn is_landing(&self) -> bool {
        matches!(self, Self::Merge { .. } | Self::Enqueue { .. })
    }
}

impl std::fmt::Display for MergeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetargetBase {
                pr_number,
                new_base,
            } => write!(f, "retarget PR #{pr_number} onto {new_base}"),
            Self::Merge {
                pr_number,
                pr_title,
                confidence,
                method,
            } => {
                let prefix = match confidence {
                    MergeConfidence::Certain => "merge",
                    MergeConfidence::Uncertain(_) => "merge (uncertain)",
                };
                write!(f, "{prefix} PR #{pr_number} ({method}): {pr_title}")
            }
            Self::Enqueue {
                pr_number,
                pr_title,
                ..
            } => write!(f, "enqueue PR #{pr_number}: {pr_title}"),
            Self::Skip {
                subject,
                pr_number,
                reasons,
            } => {
                match pr_number {
                    Some(n) => write!(f, "stop at PR #{n} ({subject})")?,
                    None => write!(f, "stop at {subject}")?,
                }
                if !reasons.is_empty() {
                    write!(f, ": {}", reasons.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Options for merge planning
#[derive(Debug, Clone)]
pub struct MergePlanOptions {
    /// Branch the stack lands on
    pub base_branch: String,
    /// How PRs are merged
    pub method: MergeMethod,
    /// Enqueue instead of merging directly
    pub merge_queue: bool,
    /// Require passing checks
    pub require_checks: bool,
    /// Require an approving review
    pub require_approval: bool,
    /// Consider at most this many entries from the bottom
    pub count: Option<usize>,
}

impl Default for MergePlanOptions {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            method: MergeMethod::Squash,
            merge_queue: false,
            require_checks: true,
            require_approval: true,
            count: None,
        }
    }
}

/// Merge plan - the functional core output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// Ordered steps; a trailing `Skip` marks where the scan stopped
    pub steps: Vec<MergeStep>,
}

impl MergePlan {
    /// Check if the plan lands nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.steps.iter().any(MergeStep::is_landing)
    }

    /// Number of PRs merged or enqueued
    #[must_use]
    pub fn merge_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_landing()).count()
    }

    /// The step that stopped the scan, if any
    pub fn blocker(&self) -> Option<&MergeStep> {
        self.steps
            .last()
            .filter(|s| matches!(s, MergeStep::Skip { .. }))
    }
}

/// Why `pr` cannot be merged right now; empty means eligible
pub fn blocking_reasons(pr: &PullRequestRecord, options: &MergePlanOptions) -> Vec<String> {
    let mut reasons = Vec::new();
    if pr.state != PrState::Open {
        reasons.push(format!("PR is {}", pr.state));
    }
    if pr.status.is_draft {
        reasons.push("PR is a draft".to_string());
    }
    if pr.status.mergeable == Some(false) {
        reasons.push("PR has merge conflicts".to_string());
    }
    if options.require_checks {
        match pr.status.checks {
            CheckState::Passing => {}
            CheckState::Pending => reasons.push("checks are still running".to_string()),
            CheckState::Failing => reasons.push("checks are failing".to_string()),
            CheckState::Missing => reasons.push("no checks reported".to_string()),
        }
    }
    if options.require_approval {
        match pr.status.review {
            ReviewState::Approved => {}
            ReviewState::ChangesRequested => reasons.push("changes requested".to_string()),
            ReviewState::ReviewRequired | ReviewState::None => {
                reasons.push("not approved".to_string());
            }
        }
    }
    reasons
}

/// Index open PRs by commit-id.
///
/// When several PRs track the same commit-id the lowest number wins; the
/// others are duplicates that `update` will close.
#[must_use]
pub fn prs_by_commit_id(records: Vec<PullRequestRecord>) -> HashMap<CommitId, PullRequestRecord> {
    let mut prs: HashMap<CommitId, PullRequestRecord> = HashMap::new();
    for record in records {
        match prs.get(&record.commit_id) {
            Some(kept) if kept.number <= record.number => {}
            _ => {
                prs.insert(record.commit_id.clone(), record);
            }
        }
    }
    prs
}

/// Create a merge plan (PURE - no I/O, easily testable)
///
/// `entries` is the submittable stack, bottom first; `prs` maps commit-ids
/// to their open PRs. The scan stops at the first entry that has no PR or
/// fails a gate; nothing above it is touched.
#[must_use]
pub fn create_merge_plan<S: BuildHasher>(
    entries: &[CommitEntry],
    prs: &HashMap<CommitId, PullRequestRecord, S>,
    options: &MergePlanOptions,
) -> MergePlan {
    let mut steps = Vec::new();
    let limit = options.count.unwrap_or(entries.len());

    for (position, entry) in entries.iter().take(limit).enumerate() {
        let Some(pr) = prs.get(&entry.commit_id) else {
            steps.push(MergeStep::Skip {
                subject: entry.subject.clone(),
                pr_number: None,
                reasons: vec!["no open PR".to_string()],
            });
            break;
        };

        let reasons = blocking_reasons(pr, options);
        if !reasons.is_empty() {
            steps.push(MergeStep::Skip {
                subject: entry.subject.clone(),
                pr_number: Some(pr.number),
                reasons,
            });
            break;
        }

        if position > 0 && pr.base_branch != options.base_branch {
            steps.push(MergeStep::RetargetBase {
                pr_number: pr.number,
                new_base: options.base_branch.clone(),
            });
        }

        let confidence = if pr.status.mergeable.is_none() {
            MergeConfidence::Uncertain("mergeability not yet computed".to_string())
        } else {
            MergeConfidence::Certain
        };
        steps.push(if options.merge_queue {
            MergeStep::Enqueue {
                pr_number: pr.number,
                pr_title: pr.title.clone(),
                confidence,
            }
        } else {
            MergeStep::Merge {
                pr_number: pr.number,
                pr_title: pr.title.clone(),
                method: options.method,
                confidence,
            }
        });
    }

    MergePlan { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrStatus;

    fn entry(i: u64) -> CommitEntry {
        let id = format!("{i:08x}");
        CommitEntry {
            hash: format!("{id}{}", "0".repeat(32)),
            commit_id: CommitId::parse(&id).unwrap(),
            subject: format!("Commit {i}"),
            message: format!("Commit {i}\n\ncommit-id:{id}"),
        }
    }

    fn ready_pr(e: &CommitEntry, number: u64, base: &str) -> PullRequestRecord {
        PullRequestRecord {
            number,
            commit_id: e.commit_id.clone(),
            head_branch: format!("spr/main/{}", e.commit_id),
            base_branch: base.to_string(),
            head_commit: e.hash.clone(),
            title: e.subject.clone(),
            state: PrState::Open,
            status: PrStatus {
                checks: CheckState::Passing,
                review: ReviewState::Approved,
                mergeable: Some(true),
                is_draft: false,
            },
            html_url: format!("https://github.com/o/r/pull/{number}"),
        }
    }

    #[test]
    fn test_gates_collect_every_reason() {
        let e = entry(1);
        let mut pr = ready_pr(&e, 1, "main");
        pr.status.is_draft = true;
        pr.status.checks = CheckState::Failing;
        pr.status.review = ReviewState::ChangesRequested;
        let reasons = blocking_reasons(&pr, &MergePlanOptions::default());
        assert_eq!(reasons.len(), 3);
    }

    #[test]
    fn test_gates_respect_config() {
        let e = entry(1);
        let mut pr = ready_pr(&e, 1, "main");
        pr.status.checks = CheckState::Pending;
        pr.status.review = ReviewState::ReviewRequired;
        let options = MergePlanOptions {
            require_checks: false,
            require_approval: false,
            ..Default::default()
        };
        assert!(blocking_reasons(&pr, &options).is_empty());
    }

    #[test]
    fn test_unknown_mergeability_is_uncertain() {
        let e = entry(1);
        let mut pr = ready_pr(&e, 1, "main");
        pr.status.mergeable = None;
        let prs = HashMap::from([(e.commit_id.clone(), pr)]);
        let plan = create_merge_plan(&[e], &prs, &MergePlanOptions::default());
        assert!(matches!(
            plan.steps[0],
            MergeStep::Merge {
                confidence: MergeConfidence::Uncertain(_),
                ..
            }
        ));
    }

    #[test]
    fn test_upper_prs_are_retargeted_before_merge() {
        let entries = vec![entry(1), entry(2)];
        let prs = HashMap::from([
            (entries[0].commit_id.clone(), ready_pr(&entries[0], 1, "main")),
            (
                entries[1].commit_id.clone(),
                ready_pr(&entries[1], 2, "spr/main/00000001"),
            ),
        ]);
        let plan = create_merge_plan(&entries, &prs, &MergePlanOptions::default());
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(
            plan.steps[1],
            MergeStep::RetargetBase {
                pr_number: 2,
                new_base: "main".to_string()
            }
        );
        assert_eq!(plan.merge_count(), 2);
        assert!(plan.blocker().is_none());
    }

    #[test]
    fn test_merge_queue_enqueues() {
        let e = entry(1);
        let prs = HashMap::from([(e.commit_id.clone(), ready_pr(&e, 1, "main"))]);
        let options = MergePlanOptions {
            merge_queue: true,
            ..Default::default()
        };
        let plan = create_merge_plan(&[e], &prs, &options);
        assert!(matches!(plan.steps[0], MergeStep::Enqueue { pr_number: 1, .. }));
    }

    #[test]
    fn test_duplicate_prs_resolve_to_the_lowest_number() {
        let e = entry(1);
        let records = vec![ready_pr(&e, 7, "main"), ready_pr(&e, 3, "main"), ready_pr(&e, 5, "main")];
        let prs = prs_by_commit_id(records);
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[&e.commit_id].number, 3);

        let plan = create_merge_plan(&[e], &prs, &MergePlanOptions::default());
        assert!(matches!(plan.steps[0], MergeStep::Merge { pr_number: 3, .. }));
    }

    #[test]
    fn test_missing_pr_stops_scan() {
        let entries = vec![entry(1), entry(2)];
        let prs = HashMap::from([(entries[1].commit_id.clone(), ready_pr(&entries[1], 2, "main"))]);
        let plan = create_merge_plan(&entries, &prs, &MergePlanOptions::default());
        assert!(plan.is_empty());
        assert!(matches!(
            plan.blocker(),
            Some(MergeStep::Skip { pr_number: None, .. })
        ));
    }
}
