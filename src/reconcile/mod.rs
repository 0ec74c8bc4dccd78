//! PR reconciler
//!
//! Three-phase pattern:
//! 1. Gather - list open PRs, check which vanished commits landed (effectful)
//! 2. Plan - match by commit-id and order the operations (pure, testable)
//! 3. Execute - issue the operations with retries (effectful)

mod execute;
mod order;
mod plan;

pub use execute::{ExecuteOptions, ExecutionReport, OpOutcome, OpReport, execute_plan};
pub use order::order_operations;
pub use plan::{
    GONE_AWAY_COMMENT, Observation, PlannedOp, ReconcileOptions, ReconcilePlan, RemoteOp,
    RemoteState, TargetEntry, create_reconcile_plan, gather_remote_state, linear_targets,
};
