//! Command-line interface for `spr`

mod analyze;
mod breakup;
mod context;
mod merge;
mod status;
pub mod style;
mod update;

use anstream::eprintln;
use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use indicatif::ProgressBar;
use spr::error::Error;
use spr::progress::{Phase, ProgressCallback};
use spr::types::CommitId;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use style::{Stylize, spinner_style};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const ABOUT: &str = "Stacked pull requests for git: one commit, one PR, kept in sync.";

/// The CLI application for `spr`.
#[derive(Parser, Debug)]
#[command(name = "spr", about = ABOUT, version)]
pub struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', long = "path", global = true, default_value = ".")]
    pub path: PathBuf,

    /// Log verbosity (-v debug, -vv trace); `RUST_LOG` takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and update one PR per commit in the stack
    #[command(alias = "up")]
    Update {
        /// Show the plan without touching the remote
        #[arg(long)]
        pretend: bool,
        /// Show the plan and ask before executing
        #[arg(long)]
        confirm: bool,
        /// Only consider the bottom N commits
        #[arg(long)]
        count: Option<usize>,
        /// Don't rebase onto the fetched base branch first
        #[arg(long)]
        no_rebase: bool,
        /// Request a review from this user on new PRs (repeatable)
        #[arg(short = 'r', long = "reviewer")]
        reviewer: Vec<String>,
    },
    /// Report which commits depend on which
    Analyze,
    /// Split the stack into independent PR chains
    Breakup {
        /// Only independent commits, each as its own PR (default: one stack per tree)
        #[arg(long, conflicts_with_all = ["stacks", "single_stack"])]
        independent: bool,
        /// One stack per dependency tree
        #[arg(long, conflicts_with = "single_stack")]
        stacks: bool,
        /// A single stack of related commits, unrelated ones left out
        #[arg(long)]
        single_stack: bool,
        /// Only consider the bottom N commits
        #[arg(short = 'c', long)]
        count: Option<usize>,
        /// Only update PRs for these commit-ids (comma-separated)
        #[arg(long, value_delimiter = ',', value_parser = commit_id_arg)]
        update_only_these_ids: Vec<CommitId>,
        /// Request a review from this user on new PRs (repeatable)
        #[arg(short = 'r', long = "reviewer")]
        reviewer: Vec<String>,
        /// Show the plan without touching the remote
        #[arg(long)]
        pretend: bool,
        /// Show the plan and ask before executing
        #[arg(long)]
        confirm: bool,
    },
    /// Merge the ready prefix of the stack
    Merge {
        /// Merge at most the bottom N PRs
        #[arg(long)]
        count: Option<usize>,
        /// Show what would be merged
        #[arg(long)]
        pretend: bool,
        /// Show the plan and ask before executing
        #[arg(long)]
        confirm: bool,
        /// Enqueue in the merge queue instead of merging directly
        #[arg(long)]
        merge_queue: bool,
    },
    /// Show the stack and the state of each PR
    #[command(alias = "st")]
    Status,
}

impl Cli {
    /// Run the selected command and map the outcome to an exit code
    pub async fn run(self) -> ExitCode {
        init_tracing(self.verbose);

        let outcome = match self.command {
            Commands::Update {
                pretend,
                confirm,
                count,
                no_rebase,
                reviewer,
            } => {
                update::run_update(
                    &self.path,
                    update::UpdateOptions {
                        pretend,
                        confirm,
                        count,
                        no_rebase,
                        reviewers: reviewer,
                    },
                )
                .await
            }
            Commands::Analyze => analyze::run_analyze(&self.path).await.map(|()| true),
            Commands::Breakup {
                independent,
                stacks: _,
                single_stack,
                count,
                update_only_these_ids,
                reviewer,
                pretend,
                confirm,
            } => {
                breakup::run_breakup(
                    &self.path,
                    breakup::BreakupOptions {
                        independent,
                        single_stack,
                        count,
                        only_ids: update_only_these_ids,
                        reviewers: reviewer,
                        pretend,
                        confirm,
                    },
                )
                .await
            }
            Commands::Merge {
                count,
                pretend,
                confirm,
                merge_queue,
            } => {
                merge::run_merge(
                    &self.path,
                    merge::MergeOptions {
                        count,
                        pretend,
                        confirm,
                        merge_queue,
                    },
                )
                .await
            }
            Commands::Status => status::run_status(&self.path).await.map(|()| true),
        };

        match outcome {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("{} {e}", "error:".error());
                if let Some(hint) = hint_for(&e) {
                    eprintln!("{}", hint.muted());
                }
                ExitCode::FAILURE
            }
        }
    }
}

fn commit_id_arg(value: &str) -> Result<CommitId, String> {
    CommitId::parse(value.trim()).map_err(|e| e.to_string())
}

fn hint_for(error: &Error) -> Option<&'static str> {
    match error {
        Error::DuplicateCommitId { .. } => {
            Some("Reword one of the commits so each carries its own commit-id trailer.")
        }
        Error::AmbiguousRange { .. } => Some("Rebase your branch onto the base branch first."),
        Error::Auth(_) => Some("Set GITHUB_TOKEN or run `gh auth login`."),
        Error::ReconciliationImpossible(_) => {
            Some("Nothing was changed. Fix the PR bases on GitHub and run again.")
        }
        _ => None,
    }
}

/// Diagnostics go to stderr; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "spr=debug",
        _ => "spr=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// Progress reporting on a terminal spinner
pub struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    /// Start a spinner with an initial message
    pub fn spinner(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    /// Stop the spinner, leaving a final line
    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(message.to_string());
    }

    /// Stop the spinner and erase it
    pub fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

#[async_trait]
impl ProgressCallback for CliProgress {
    async fn on_phase(&self, phase: Phase) {
        self.spinner.set_message(format!("{phase}..."));
    }

    async fn on_message(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    async fn on_error(&self, error: &Error) {
        self.spinner
            .println(format!("{} {error}", "warning:".warn()));
    }
}
