//! Update command - bring the stack's PRs in line with the local commits

use crate::cli::CliProgress;
use crate::cli::context::CommandContext;
use crate::cli::style::{CHECK, Stylize, arrow};
use anstream::println;
use dialoguer::Confirm;
use spr::error::{Error, Result};
use spr::platform::PlatformService;
use spr::reconcile::{
    ExecuteOptions, ExecutionReport, Observation, OpOutcome, ReconcileOptions, ReconcilePlan,
    RemoteState, TargetEntry, create_reconcile_plan, execute_plan, gather_remote_state,
    linear_targets,
};
use spr::types::CommitId;
use std::collections::HashSet;
use std::path::Path;

/// Options for the update command
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Show the plan without touching the remote
    pub pretend: bool,
    /// Preview plan and prompt for confirmation before executing
    pub confirm: bool,
    /// Only the bottom N commits
    pub count: Option<usize>,
    /// Skip the rebase onto the fetched base
    pub no_rebase: bool,
    /// Reviewers for newly opened PRs
    pub reviewers: Vec<String>,
}

/// Run the update command; `Ok(false)` when some remote operations failed
pub async fn run_update(path: &Path, options: UpdateOptions) -> Result<bool> {
    let mut ctx = CommandContext::new(path).await?;
    ctx.config.user.no_rebase |= options.no_rebase;
    ctx.ensure_not_on_stack_branch().await?;

    if !options.pretend {
        ctx.fetch_and_rebase().await?;
    }

    let stack = ctx.local_stack().await?;
    let entries = stack.submittable_prefix(options.count);
    if entries.is_empty() {
        println!("{}", "No commits to submit.".muted());
        return Ok(true);
    }
    if entries.len() < stack.len() {
        println!(
            "{}",
            format!(
                "Submitting {} of {} commit(s); stopped at WIP or --count.",
                entries.len(),
                stack.len()
            )
            .muted()
        );
    }

    // Commits above the submitted prefix keep whatever PRs they have
    let leave_alone: HashSet<CommitId> = stack
        .held_back(options.count)
        .iter()
        .map(|e| e.commit_id.clone())
        .collect();
    let platform = ctx.platform().await?;
    let targets = linear_targets(entries);
    let flags = SubmitFlags::from(options);
    submit_targets(&ctx, platform.as_ref(), &targets, &leave_alone, &flags).await
}

/// Flags shared by every command that reconciles
#[derive(Debug, Clone, Default)]
pub struct SubmitFlags {
    /// Plan only
    pub pretend: bool,
    /// Ask before executing
    pub confirm: bool,
    /// Reviewers for newly opened PRs
    pub reviewers: Vec<String>,
}

impl From<UpdateOptions> for SubmitFlags {
    fn from(options: UpdateOptions) -> Self {
        Self {
            pretend: options.pretend,
            confirm: options.confirm,
            reviewers: options.reviewers,
        }
    }
}

/// Gather, plan, and execute a reconciliation towards `targets`.
///
/// PRs whose commit-id is in `leave_alone` are neither updated nor closed.
pub async fn submit_targets(
    ctx: &CommandContext,
    platform: &dyn PlatformService,
    targets: &[TargetEntry],
    leave_alone: &HashSet<CommitId>,
    flags: &SubmitFlags,
) -> Result<bool> {
    let retry = ctx.retry();
    let progress = CliProgress::spinner("Listing open pull requests...");
    let gathered = gather_remote_state(
        platform,
        &ctx.git,
        &ctx.naming,
        &ctx.base_ref(),
        targets,
        &retry,
    )
    .await;
    progress.clear();
    let remote: RemoteState = gathered?;

    let plan = create_reconcile_plan(
        targets,
        &remote,
        &ReconcileOptions::new(ctx.naming.clone(), ctx.config.repo.disappeared_policy)
            .leaving_alone(leave_alone.iter().cloned()),
    )?;

    print_observations(&plan);
    if !flags.reviewers.is_empty() {
        warn_existing_reviewers(targets, &remote);
    }

    if plan.is_empty() {
        println!("{} {}", CHECK.success(), "Already up to date".muted());
        return Ok(true);
    }

    if flags.pretend || flags.confirm {
        print_plan(&plan);
    }
    if flags.pretend {
        println!("{}", "Pretend mode: nothing was changed.".muted());
        return Ok(true);
    }
    if flags.confirm
        && !Confirm::new()
            .with_prompt("Proceed?")
            .default(true)
            .interact()
            .map_err(|e| Error::Internal(format!("Failed to read confirmation: {e}")))?
    {
        println!("{}", "Aborted".muted());
        return Ok(true);
    }

    let progress = CliProgress::spinner("Updating pull requests...");
    let report = execute_plan(
        &plan,
        platform,
        &ExecuteOptions {
            retry,
            push_individually: ctx.config.repo.push_individually,
            reviewers: flags.reviewers.clone(),
        },
        &progress,
    )
    .await;
    progress.clear();

    print_report(&report);
    Ok(report.is_success())
}

/// Reviewers only go on PRs opened by this run
fn warn_existing_reviewers(targets: &[TargetEntry], remote: &RemoteState) {
    for record in &remote.records {
        if targets.iter().any(|t| t.commit_id == record.commit_id) {
            println!(
                "{}",
                format!("warning: not updating reviewers for PR #{}", record.number).warn()
            );
        }
    }
}

fn print_plan(plan: &ReconcilePlan) {
    println!("{}:", "Plan".emphasis());
    for planned in &plan.ops {
        println!("  {} {}", arrow(), planned.op);
    }
    println!();
}

fn print_observations(plan: &ReconcilePlan) {
    for observation in &plan.observations {
        match observation {
            Observation::Unchanged { .. } => {}
            Observation::Landed { number, commit_id } => println!(
                "{}",
                format!("PR #{number} ({commit_id}) already landed").muted()
            ),
            Observation::Abandoned { number, commit_id } => println!(
                "{} PR #{number} ({commit_id}) left the stack; keeping it open",
                "note:".warn()
            ),
        }
    }
}

fn print_report(report: &ExecutionReport) {
    for op in &report.ops {
        match &op.outcome {
            OpOutcome::Succeeded { .. } => println!("  {} {}", CHECK.success(), op.op),
            OpOutcome::Failed { kind, message } => {
                println!("  {} {} ({kind} error)", "✗".error(), op.op);
                println!("      {}", message.muted());
            }
            OpOutcome::Blocked { .. } => {
                println!("  {} {}", "-".muted(), format!("{} (blocked)", op.op).muted());
            }
        }
    }

    println!();
    let created = report.created_numbers();
    if report.is_success() {
        println!(
            "{} {} operation(s), {} PR(s) created",
            format!("{CHECK} Update complete:").success(),
            report.succeeded_count().accent(),
            created.len().accent()
        );
    } else {
        println!(
            "{} {} succeeded, {} failed, {} blocked",
            "Update incomplete:".warn(),
            report.succeeded_count().accent(),
            report.failures().count().accent(),
            report.blocked_count().accent()
        );
        println!(
            "{}",
            "Run 'spr update' again to retry the remaining work.".muted()
        );
    }
}
