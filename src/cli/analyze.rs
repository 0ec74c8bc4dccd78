//! Analyze command - report which commits depend on which

use crate::cli::CliProgress;
use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check};
use anstream::println;
use spr::analyze::{AnalyzeOptions, analyze_stack, render_report};
use spr::error::Result;
use std::path::Path;

/// Run the analyze command
pub async fn run_analyze(path: &Path) -> Result<()> {
    let ctx = CommandContext::new(path).await?;
    let stack = ctx.local_stack().await?;
    if stack.is_empty() {
        println!("{}", "No commits between the base branch and HEAD.".muted());
        return Ok(());
    }

    let base = ctx.git.rev_parse(&ctx.base_ref()).await?;
    let progress = CliProgress::spinner("Probing commits...");
    let analysis = analyze_stack(
        &ctx.git,
        &base,
        &stack.entries,
        &AnalyzeOptions {
            probe_timeout: ctx.config.user.probe_timeout(),
        },
        &progress,
    )
    .await;
    let analysis = match analysis {
        Ok(analysis) => {
            progress.finish(&format!(
                "{} Analyzed {} commit(s) with {} probe(s)",
                check(),
                stack.len(),
                analysis.probes
            ));
            analysis
        }
        Err(e) => {
            progress.clear();
            return Err(e);
        }
    };

    println!();
    println!("{}", render_report(&analysis));
    Ok(())
}
