//! Breakup command - submit independent parts of the stack as separate PRs

use crate::cli::CliProgress;
use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check};
use crate::cli::update::{SubmitFlags, submit_targets};
use anstream::println;
use spr::analyze::{AnalyzeOptions, analyze_stack};
use spr::breakup::{BreakupMode, materialize_breakup};
use spr::error::{Error, Result};
use spr::types::CommitId;
use std::collections::HashSet;
use std::path::Path;

/// Options for the breakup command
#[derive(Debug, Clone, Default)]
pub struct BreakupOptions {
    /// Standalone PRs for independent commits only
    pub independent: bool,
    /// One stack of the related commits, unrelated ones left out
    pub single_stack: bool,
    /// Only the bottom N commits
    pub count: Option<usize>,
    /// Only submit PRs for these commit-ids (and the chains under them)
    pub only_ids: Vec<CommitId>,
    /// Reviewers for newly opened PRs
    pub reviewers: Vec<String>,
    /// Show the plan without touching the remote
    pub pretend: bool,
    /// Preview plan and prompt for confirmation before executing
    pub confirm: bool,
}

/// Run the breakup command; `Ok(false)` when some remote operations failed
pub async fn run_breakup(path: &Path, options: BreakupOptions) -> Result<bool> {
    let ctx = CommandContext::new(path).await?;
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
    if let Some(unknown) = options
        .only_ids
        .iter()
        .find(|id| !entries.iter().any(|e| &e.commit_id == *id))
    {
        return Err(Error::Config(format!(
            "commit-id {unknown} is not among the commits being submitted"
        )));
    }

    let mode = if options.independent {
        BreakupMode::Independent
    } else if options.single_stack {
        BreakupMode::SingleStack
    } else {
        BreakupMode::Stacks
    };
    let base = ctx.git.rev_parse(&ctx.base_ref()).await?;
    let timeout = ctx.config.user.probe_timeout();

    let progress = CliProgress::spinner("Probing commits...");
    let built = async {
        let analysis = analyze_stack(
            &ctx.git,
            &base,
            entries,
            &AnalyzeOptions {
                probe_timeout: timeout,
            },
            &progress,
        )
        .await?;
        materialize_breakup(&ctx.git, &base, entries, &analysis, mode, timeout).await
    }
    .await;
    let mut plan = match built {
        Ok(plan) => {
            progress.finish(&format!(
                "{} {} PR(s) to submit, {} skipped",
                check(),
                plan.targets.len(),
                plan.skipped.len()
            ));
            plan
        }
        Err(e) => {
            progress.clear();
            return Err(e);
        }
    };

    // Commits outside this submission keep whatever PRs they have
    let mut leave_alone: HashSet<CommitId> = stack
        .held_back(options.count)
        .iter()
        .map(|e| e.commit_id.clone())
        .collect();
    if !options.only_ids.is_empty() {
        let selected: HashSet<CommitId> = options.only_ids.iter().cloned().collect();
        leave_alone.extend(plan.restrict_to(&selected));
    }

    for skipped in &plan.skipped {
        println!(
            "  {} {} {}",
            "skip".warn(),
            skipped.subject,
            format!("({})", skipped.reason).muted()
        );
    }
    if plan.targets.is_empty() {
        println!("{}", "Nothing can be submitted on its own.".muted());
        return Ok(true);
    }

    leave_alone.extend(plan.skipped.iter().map(|s| s.commit_id.clone()));
    let platform = ctx.platform().await?;
    submit_targets(
        &ctx,
        platform.as_ref(),
        &plan.targets,
        &leave_alone,
        &SubmitFlags {
            pretend: options.pretend,
            confirm: options.confirm,
            reviewers: options.reviewers,
        },
    )
    .await
}
