//! Status command - show the stack and its PRs

use crate::cli::context::CommandContext;
use crate::cli::style::Stylize;
use anstream::println;
use spr::error::Result;
use spr::retry::with_retry;
use spr::types::{CheckState, CommitId, PullRequestRecord, ReviewState};
use std::collections::HashMap;
use std::path::Path;

fn checks_label(state: CheckState) -> String {
    match state {
        CheckState::Passing => "checks ✓".success(),
        CheckState::Pending => "checks …".warn(),
        CheckState::Failing => "checks ✗".error(),
        CheckState::Missing => "no checks".muted(),
    }
}

fn review_label(state: ReviewState) -> String {
    match state {
        ReviewState::Approved => "approved".success(),
        ReviewState::ChangesRequested => "changes requested".error(),
        ReviewState::ReviewRequired => "review required".warn(),
        ReviewState::None => "no review".muted(),
    }
}

/// Run the status command
pub async fn run_status(path: &Path) -> Result<()> {
    let ctx = CommandContext::new(path).await?;
    let stack = ctx.local_stack().await?;
    if stack.is_empty() {
        println!("{}", "No commits between the base branch and HEAD.".muted());
        return Ok(());
    }

    let platform = ctx.platform().await?;
    let records = with_retry(&ctx.retry(), "list open pull requests", || {
        platform.list_open_pull_requests(&ctx.naming)
    })
    .await?;
    let prs: HashMap<&CommitId, &PullRequestRecord> =
        records.iter().map(|r| (&r.commit_id, r)).collect();

    println!(
        "{} {}",
        "Stack on".emphasis(),
        ctx.base_ref().accent()
    );
    // Tip first, the way `git log` shows it
    for entry in stack.entries.iter().rev() {
        let pr = match prs.get(&entry.commit_id) {
            Some(pr) => {
                let mut parts = vec![checks_label(pr.status.checks), review_label(pr.status.review)];
                if pr.status.is_draft {
                    parts.push("draft".muted());
                }
                if pr.status.mergeable == Some(false) {
                    parts.push("conflicts".error());
                }
                let stale = if pr.head_commit == entry.hash {
                    String::new()
                } else {
                    format!(" {}", "(needs update)".warn())
                };
                format!("{} {}{stale}", format!("#{}", pr.number).accent(), parts.join(", "))
            }
            None if entry.is_wip() => "wip".muted(),
            None => "no PR".muted(),
        };
        println!(
            "  {} {} {}",
            entry.short_hash().muted(),
            entry.subject,
            pr
        );
    }
    Ok(())
}
