//! Shared command context for CLI commands
//!
//! Extracts the setup shared by every command: opening the repository,
//! loading layered config, and (for commands that talk to GitHub) building
//! the platform service.

use crate::cli::style::{Stylize, check, spinner_style};
use indicatif::ProgressBar;
use spr::auth::get_github_auth;
use spr::config::{Config, load_config};
use spr::error::{Error, Result};
use spr::platform::{BranchNaming, GitHubService, PlatformService, detect_platform};
use spr::retry::RetryPolicy;
use spr::stack::build_local_stack;
use spr::types::{LocalStack, PlatformConfig};
use spr::vcs::GitCli;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Shared context for CLI commands
pub struct CommandContext {
    /// The git repository
    pub git: GitCli,
    /// Effective configuration (files plus flag overrides)
    pub config: Config,
    /// Stack branch naming for this base branch
    pub naming: BranchNaming,
}

impl CommandContext {
    /// Open the repository at `path` and load its configuration
    pub async fn new(path: &Path) -> Result<Self> {
        let probe = GitCli::open(path).await?;
        let config = load_config(probe.root())?;
        let git = probe.with_command_logging(config.user.log_git_commands);
        let naming = BranchNaming::new(
            config.repo.branch_prefix.clone(),
            config.repo.base_branch.clone(),
        );
        debug!(root = %git.root().display(), base = %config.repo.base_ref(), "opened repository");
        Ok(Self {
            git,
            config,
            naming,
        })
    }

    /// Remote-tracking base, e.g. `origin/main`
    pub fn base_ref(&self) -> String {
        self.config.repo.base_ref()
    }

    /// Retry budget for remote calls
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.user)
    }

    /// Fail if HEAD is one of our own stack branches
    pub async fn ensure_not_on_stack_branch(&self) -> Result<()> {
        if let Some(branch) = self.git.current_branch().await?
            && self.naming.matches(&branch)
        {
            return Err(Error::Config(format!(
                "refusing to run on stack branch {branch}; check out your working branch"
            )));
        }
        Ok(())
    }

    /// Fetch the remote and, unless disabled, rebase onto the fresh base
    pub async fn fetch_and_rebase(&self) -> Result<()> {
        let remote = &self.config.repo.remote;
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.set_message(format!("Fetching from {}...", remote.emphasis()));
        spinner.enable_steady_tick(Duration::from_millis(80));

        self.git.fetch(remote).await?;

        if self.config.user.no_rebase {
            spinner.finish_with_message(format!("{} Fetched from {}", check(), remote.emphasis()));
            return Ok(());
        }

        let base = self.base_ref();
        spinner.set_message(format!("Rebasing onto {}...", base.accent()));
        self.git.rebase(&base).await?;
        spinner.finish_with_message(format!(
            "{} Fetched from {} and rebased onto {}",
            check(),
            remote.emphasis(),
            base.accent()
        ));
        Ok(())
    }

    /// Build the local stack from the base to HEAD
    pub async fn local_stack(&self) -> Result<LocalStack> {
        build_local_stack(&self.git, &self.base_ref(), "HEAD").await
    }

    /// Repository coordinates: config overrides first, then the remote URL
    pub async fn platform_config(&self) -> Result<PlatformConfig> {
        let repo = &self.config.repo;
        if let (Some(owner), Some(name)) = (&repo.owner, &repo.name) {
            return Ok(PlatformConfig {
                owner: owner.clone(),
                repo: name.clone(),
                host: repo.host.clone(),
            });
        }
        let remotes = self.git.remotes().await?;
        detect_platform(&remotes, &repo.remote, repo.host.as_deref())
    }

    /// Authenticate and build the GitHub service
    pub async fn platform(&self) -> Result<Box<dyn PlatformService>> {
        let platform_config = self.platform_config().await?;
        let auth = get_github_auth(platform_config.host.as_deref()).await?;
        debug!(source = ?auth.source, owner = %platform_config.owner, repo = %platform_config.repo, "authenticated");
        let service = GitHubService::new(
            &auth.token,
            platform_config,
            self.git.clone(),
            self.config.repo.remote.clone(),
        )?;
        Ok(Box::new(service))
    }
}
