//! Merge execution - effectful operations
//!
//! Takes a [`MergePlan`] and performs it via the platform API, bottom-up,
//! stopping at the first failure.

use crate::merge::plan::{MergePlan, MergeStep};
use crate::platform::PlatformService;
use crate::progress::{Phase, ProgressCallback};
use crate::retry::{RetryPolicy, with_retry};
use tracing::{debug, warn};

/// Result of merge execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeExecutionResult {
    /// PRs that were merged directly
    pub merged: Vec<u64>,
    /// PRs accepted by the merge queue
    pub enqueued: Vec<u64>,
    /// PR where execution stopped with an error (if any)
    pub failed_pr: Option<u64>,
    /// Error message from the failed step (if any)
    pub error_message: Option<String>,
}

impl MergeExecutionResult {
    /// Check if every step went through
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed_pr.is_none()
    }

    /// Check if anything landed or was queued
    #[must_use]
    pub const fn has_merges(&self) -> bool {
        !self.merged.is_empty() || !self.enqueued.is_empty()
    }

    fn fail(&mut self, pr_number: u64, message: String) {
        warn!(pr_number, %message, "merge step failed");
        self.failed_pr = Some(pr_number);
        self.error_message = Some(message);
    }
}

/// Execute the merge plan (EFFECTFUL)
///
/// Stops at the first failed step or at the plan's `Skip`. Merge-queue
/// acceptance counts as done for this run.
pub async fn execute_merge(
    plan: &MergePlan,
    platform: &dyn PlatformService,
    retry: &RetryPolicy,
    progress: &dyn ProgressCallback,
) -> MergeExecutionResult {
    let mut result = MergeExecutionResult::default();
    progress.on_phase(Phase::Executing).await;

    for step in &plan.steps {
        match step {
            MergeStep::RetargetBase {
                pr_number,
                new_base,
            } => {
                progress
                    .on_message(&format!("Retargeting PR #{pr_number} onto {new_base}"))
                    .await;
                let op = format!("retarget PR #{pr_number}");
                if let Err(e) = with_retry(retry, &op, || {
                    platform.update_pull_request_base(*pr_number, new_base)
                })
                .await
                {
                    progress.on_error(&e).await;
                    result.fail(*pr_number, e.to_string());
                    break;
                }
            }
            MergeStep::Merge {
                pr_number,
                pr_title,
                method,
                ..
            } => {
                progress
                    .on_message(&format!("🔀 Merging PR #{pr_number}: {pr_title}"))
                    .await;
                let op = format!("merge PR #{pr_number}");
                match with_retry(retry, &op, || platform.merge_pull_request(*pr_number, *method))
                    .await
                {
                    Ok(merge_result) if merge_result.merged => {
                        let sha_display = merge_result.sha.as_deref().unwrap_or("(no sha)");
                        progress
                            .on_message(&format!("✅ Merged: {sha_display}"))
                            .await;
                        debug!(pr_number, sha = sha_display, "merged");
                        result.merged.push(*pr_number);
                    }
                    Ok(merge_result) => {
                        let message = merge_result
                            .message
                            .unwrap_or_else(|| "merge was not performed".to_string());
                        result.fail(*pr_number, message);
                        break;
                    }
                    Err(e) => {
                        progress.on_error(&e).await;
                        result.fail(*pr_number, e.to_string());
                        break;
                    }
                }
            }
            MergeStep::Enqueue {
                pr_number,
                pr_title,
                ..
            } => {
                progress
                    .on_message(&format!("📥 Enqueueing PR #{pr_number}: {pr_title}"))
                    .await;
                let op = format!("enqueue PR #{pr_number}");
                match with_retry(retry, &op, || platform.enqueue_for_merge_queue(*pr_number)).await
                {
                    Ok(()) => result.enqueued.push(*pr_number),
                    Err(e) => {
                        progress.on_error(&e).await;
                        result.fail(*pr_number, e.to_string());
                        break;
                    }
                }
            }
            MergeStep::Skip { .. } => {
                progress.on_message(&format!("⏭️  {step}")).await;
                break;
            }
        }
    }

    result
}
