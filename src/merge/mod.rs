//! Merge engine for stacked PRs
//!
//! Same gather / plan / execute split as `reconcile`:
//! 1. Gather - list open PRs with check and review status (effectful)
//! 2. Plan - walk the stack bottom-up into a `MergePlan` (pure)
//! 3. Execute - retarget and merge or enqueue (effectful)

mod execute;
mod plan;

pub use execute::{MergeExecutionResult, execute_merge};
pub use plan::{
    MergeConfidence, MergePlan, MergePlanOptions, MergeStep, blocking_reasons, create_merge_plan,
    prs_by_commit_id,
};
