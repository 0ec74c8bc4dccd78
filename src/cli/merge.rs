//! Merge command - merge approved PRs in the stack

use crate::cli::CliProgress;
use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check, spinner_style};
use anstream::println;
use dialoguer::Confirm;
use indicatif::ProgressBar;
use spr::error::{Error, Result};
use spr::merge::{
    MergeConfidence, MergeExecutionResult, MergePlan, MergePlanOptions, MergeStep,
    create_merge_plan, execute_merge, prs_by_commit_id,
};
use spr::retry::with_retry;
use std::path::Path;
use std::time::Duration;

/// Options for the merge command
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Merge at most the bottom N PRs
    pub count: Option<usize>,
    /// Dry run - show what would be merged without making changes
    pub pretend: bool,
    /// Preview plan and prompt for confirmation before executing
    pub confirm: bool,
    /// Force the merge queue for this run
    pub merge_queue: bool,
}

/// Run the merge command; `Ok(false)` when a merge failed
pub async fn run_merge(path: &Path, options: MergeOptions) -> Result<bool> {
    // Phase 1: GATHER
    let ctx = CommandContext::new(path).await?;
    ctx.ensure_not_on_stack_branch().await?;
    let stack = ctx.local_stack().await?;
    let entries = stack.submittable();
    if entries.is_empty() {
        println!("{}", "No commits in the stack.".muted());
        return Ok(true);
    }

    let platform = ctx.platform().await?;
    let retry = ctx.retry();
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.set_message("Checking pull requests...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    let records = with_retry(&retry, "list open pull requests", || {
        platform.list_open_pull_requests(&ctx.naming)
    })
    .await;
    spinner.finish_and_clear();
    let prs = prs_by_commit_id(records?);

    // Phase 2: PLAN
    let repo = &ctx.config.repo;
    let plan = create_merge_plan(
        entries,
        &prs,
        &MergePlanOptions {
            base_branch: repo.base_branch.clone(),
            method: repo.merge_method,
            merge_queue: repo.merge_queue || options.merge_queue,
            require_checks: repo.require_checks,
            require_approval: repo.require_approval,
            count: options.count,
        },
    );

    // Phase 3: EXECUTE
    if options.pretend {
        report_merge_plan(&plan);
        return Ok(true);
    }

    if plan.is_empty() {
        println!("{}", "No PRs are ready to merge.".muted());
        print_blocker(&plan);
        return Ok(true);
    }

    if options.confirm {
        report_merge_plan(&plan);
        if !Confirm::new()
            .with_prompt("Proceed with merge?")
            .default(true)
            .interact()
            .map_err(|e| Error::Internal(format!("Failed to read confirmation: {e}")))?
        {
            println!("{}", "Aborted".muted());
            return Ok(true);
        }
        println!();
    }

    println!(
        "{} {}",
        "Merging".emphasis(),
        format!("{} PR(s)...", plan.merge_count()).accent()
    );

    let progress = CliProgress::spinner("Merging...");
    let result = execute_merge(&plan, platform.as_ref(), &retry, &progress).await;
    progress.clear();

    // New base: let the next `spr update` re-derive the rest of the stack
    if !result.merged.is_empty() {
        let remote = &ctx.config.repo.remote;
        match ctx.git.fetch(remote).await {
            Ok(()) => println!("{} Fetched from {}", check(), remote.emphasis()),
            Err(e) => println!("{}", format!("⚠️  Fetch failed: {e}").warn()),
        }
    }

    print_merge_summary(&result);
    print_blocker(&plan);
    Ok(result.is_success())
}

/// Print merge summary
fn print_merge_summary(result: &MergeExecutionResult) {
    println!();
    if result.is_success() {
        println!("{} Merge complete!", check());
    } else {
        println!("{} Merge partially complete", "⚠️".warn());
    }

    let list = |numbers: &[u64]| {
        numbers
            .iter()
            .map(|n| format!("#{n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    if !result.merged.is_empty() {
        println!("   Merged: {}", list(&result.merged).accent());
    }
    if !result.enqueued.is_empty() {
        println!("   Enqueued: {}", list(&result.enqueued).accent());
    }
    if let Some(failed) = result.failed_pr {
        println!("   {} {}", "Failed:".warn(), format!("#{failed}").warn());
        if let Some(ref msg) = result.error_message {
            println!("          {}", msg.muted());
        }
    }
    if result.has_merges() && result.enqueued.is_empty() {
        println!(
            "{}",
            "Run 'spr update' to restack the remaining commits.".muted()
        );
    }
}

/// Report what would be merged (dry run)
fn report_merge_plan(plan: &MergePlan) {
    println!("{}:", "Merge plan".emphasis());
    println!();

    if plan.steps.is_empty() {
        println!("  {}", "No PRs to process".muted());
        println!();
        return;
    }

    for step in &plan.steps {
        match step {
            MergeStep::Merge {
                pr_number,
                pr_title,
                confidence,
                method,
            } => match confidence {
                MergeConfidence::Certain => {
                    println!(
                        "  {} PR #{pr_number} ({method}): {pr_title}",
                        "✓ Would merge".success()
                    );
                }
                MergeConfidence::Uncertain(reason) => {
                    println!(
                        "  {} PR #{pr_number} ({method}): {pr_title}",
                        "? Would attempt".warn()
                    );
                    println!("    ⚠ {}", reason.muted());
                }
            },
            MergeStep::Enqueue {
                pr_number,
                pr_title,
                ..
            } => {
                println!("  {} PR #{pr_number}: {pr_title}", "✓ Would enqueue".success());
            }
            MergeStep::RetargetBase {
                pr_number,
                new_base,
            } => {
                println!(
                    "  {} PR #{pr_number} onto {}",
                    "↪ Would retarget".accent(),
                    new_base.accent()
                );
            }
            MergeStep::Skip { .. } => {
                println!("  {} {step}", "✗ Would stop".warn());
            }
        }
    }

    println!();
    if plan.is_empty() {
        println!("{}", "No PRs are ready to merge.".muted());
    } else {
        println!("{}", "Run without --pretend to execute.".muted());
    }
}

/// Print why the scan stopped
fn print_blocker(plan: &MergePlan) {
    if let Some(MergeStep::Skip {
        subject,
        pr_number,
        reasons,
    }) = plan.blocker()
    {
        match pr_number {
            Some(n) => println!("  Stopped at PR #{n} ({}):", subject.accent()),
            None => println!("  Stopped at {}:", subject.accent()),
        }
        for reason in reasons {
            println!("    - {}", reason.muted());
        }
    }
}
