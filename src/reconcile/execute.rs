//! Reconcile execution - effectful operations
//!
//! Runs a [`ReconcilePlan`] in order. A failed operation does not stop the
//! run: everything that depends on it is marked blocked and skipped, and
//! unrelated operations still go out. The next invocation re-derives
//! whatever is left.

use crate::error::{Error, ErrorKind, Result};
use crate::platform::{NewPullRequest, PlatformService};
use crate::progress::ProgressCallback;
use crate::reconcile::plan::{ReconcilePlan, RemoteOp};
use crate::retry::{RetryPolicy, with_retry};
use tracing::{debug, warn};

/// Outcome of one planned operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation went through
    Succeeded {
        /// PR number (set for creates)
        number: Option<u64>,
    },
    /// The operation failed after retries
    Failed {
        /// Error classification
        kind: ErrorKind,
        /// Error message
        message: String,
    },
    /// Not attempted because a prerequisite did not succeed
    Blocked {
        /// Plan index of the prerequisite
        by: usize,
    },
}

/// One operation and what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReport {
    /// The operation
    pub op: RemoteOp,
    /// Its outcome
    pub outcome: OpOutcome,
}

/// Result of executing a reconcile plan
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Per-operation outcomes, in plan order
    pub ops: Vec<OpReport>,
}

impl ExecutionReport {
    /// Whether every operation succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.ops
            .iter()
            .all(|r| matches!(r.outcome, OpOutcome::Succeeded { .. }))
    }

    /// Number of successful operations
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Succeeded { .. }))
            .count()
    }

    /// Failed operations
    pub fn failures(&self) -> impl Iterator<Item = &OpReport> {
        self.ops
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Failed { .. }))
    }

    /// Number of operations skipped because a prerequisite failed
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Blocked { .. }))
            .count()
    }

    /// Numbers of PRs opened during the run
    #[must_use]
    pub fn created_numbers(&self) -> Vec<u64> {
        self.ops
            .iter()
            .filter_map(|r| match (&r.op, &r.outcome) {
                (RemoteOp::CreatePr { .. }, OpOutcome::Succeeded { number }) => *number,
                _ => None,
            })
            .collect()
    }
}

/// Options for plan execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Retry and timeout budget per remote call
    pub retry: RetryPolicy,
    /// Push each head branch separately instead of batching
    pub push_individually: bool,
    /// Logins asked to review each newly opened PR
    pub reviewers: Vec<String>,
}

fn failed(error: &Error) -> OpOutcome {
    OpOutcome::Failed {
        kind: error.kind(),
        message: error.to_string(),
    }
}

/// Execute a reconcile plan (EFFECTFUL)
pub async fn execute_plan(
    plan: &ReconcilePlan,
    platform: &dyn PlatformService,
    options: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> ExecutionReport {
    let mut outcomes: Vec<Option<OpOutcome>> = vec![None; plan.ops.len()];
    let retry = &options.retry;

    let blocker = |outcomes: &[Option<OpOutcome>], idx: usize| {
        plan.ops[idx].after.iter().copied().find(|&p| {
            !matches!(outcomes[p], Some(OpOutcome::Succeeded { .. }))
        })
    };

    let mut idx = 0;
    while idx < plan.ops.len() {
        if let Some(by) = blocker(&outcomes, idx) {
            debug!(op = %plan.ops[idx].op, by, "operation blocked");
            outcomes[idx] = Some(OpOutcome::Blocked { by });
            idx += 1;
            continue;
        }

        // Batch a run of independent head pushes
        if !options.push_individually && matches!(plan.ops[idx].op, RemoteOp::UpdateHead { .. }) {
            let start = idx;
            let mut end = idx + 1;
            while end < plan.ops.len()
                && matches!(plan.ops[end].op, RemoteOp::UpdateHead { .. })
                && plan.ops[end].after.iter().all(|&p| p < start)
                && blocker(&outcomes, end).is_none()
            {
                end += 1;
            }

            if end - start > 1 {
                let updates: Vec<(String, String)> = plan.ops[start..end]
                    .iter()
                    .filter_map(|p| match &p.op {
                        RemoteOp::UpdateHead {
                            head_branch,
                            new_commit,
                            ..
                        } => Some((head_branch.clone(), new_commit.clone())),
                        _ => None,
                    })
                    .collect();
                progress
                    .on_message(&format!("Pushing {} branches", updates.len()))
                    .await;
                let result = with_retry(retry, "push head branches", || {
                    platform.update_pull_request_heads(&updates)
                })
                .await;
                let outcome = match &result {
                    Ok(()) => OpOutcome::Succeeded { number: None },
                    Err(e) => {
                        warn!(error = %e, "batched push failed");
                        progress.on_error(e).await;
                        failed(e)
                    }
                };
                for slot in &mut outcomes[start..end] {
                    *slot = Some(outcome.clone());
                }
                idx = end;
                continue;
            }
        }

        let op = &plan.ops[idx].op;
        progress.on_message(&op.to_string()).await;
        let outcome = match run_op(op, platform, retry).await {
            Ok(number) => {
                if let Some(number) = number {
                    request_reviewers(number, platform, options, progress).await;
                }
                OpOutcome::Succeeded { number }
            }
            Err(e) => {
                warn!(op = %op, error = %e, "remote operation failed");
                progress.on_error(&e).await;
                failed(&e)
            }
        };
        outcomes[idx] = Some(outcome);
        idx += 1;
    }

    let ops = plan
        .ops
        .iter()
        .zip(outcomes)
        .map(|(planned, outcome)| OpReport {
            op: planned.op.clone(),
            outcome: outcome.unwrap_or(OpOutcome::Blocked { by: usize::MAX }),
        })
        .collect();
    ExecutionReport { ops }
}

/// Reviewer requests never fail the PR they are for
async fn request_reviewers(
    number: u64,
    platform: &dyn PlatformService,
    options: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) {
    if options.reviewers.is_empty() {
        return;
    }
    let result = with_retry(&options.retry, "request reviewers", || {
        platform.request_reviewers(number, &options.reviewers)
    })
    .await;
    if let Err(e) = result {
        warn!(pr_number = number, error = %e, "could not request reviewers");
        progress.on_error(&e).await;
    }
}

async fn run_op(
    op: &RemoteOp,
    platform: &dyn PlatformService,
    retry: &RetryPolicy,
) -> Result<Option<u64>> {
    match op {
        RemoteOp::CreatePr {
            commit_id,
            head_branch,
            base_branch,
            head_commit,
            title,
            body,
        } => {
            with_retry(retry, "push head branch", || {
                platform.update_pull_request_head(head_branch, head_commit)
            })
            .await?;
            let request = NewPullRequest {
                commit_id: commit_id.clone(),
                head_branch: head_branch.clone(),
                base_branch: base_branch.clone(),
                head_commit: head_commit.clone(),
                title: title.clone(),
                body: body.clone(),
            };
            let record = with_retry(retry, "create pull request", || {
                platform.create_pull_request(&request)
            })
            .await?;
            debug!(pr_number = record.number, %commit_id, "created PR");
            Ok(Some(record.number))
        }
        RemoteOp::UpdateHead {
            head_branch,
            new_commit,
            ..
        } => {
            with_retry(retry, "push head branch", || {
                platform.update_pull_request_head(head_branch, new_commit)
            })
            .await?;
            Ok(None)
        }
        RemoteOp::UpdateBase {
            number, new_base, ..
        } => {
            with_retry(retry, "update pull request base", || {
                platform.update_pull_request_base(*number, new_base)
            })
            .await?;
            Ok(None)
        }
        RemoteOp::ClosePr {
            number, comment, ..
        } => {
            if let Err(e) = with_retry(retry, "comment on pull request", || {
                platform.comment_pull_request(*number, comment)
            })
            .await
            {
                warn!(pr_number = number, error = %e, "could not comment before closing");
            }
            with_retry(retry, "close pull request", || {
                platform.close_pull_request(*number)
            })
            .await?;
            Ok(None)
        }
    }
}
