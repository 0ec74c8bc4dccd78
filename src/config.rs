//! Configuration loading
//!
//! Layers, later overriding earlier table-by-table:
//! 1. built-in defaults
//! 2. user file `$XDG_CONFIG_HOME/spr/config.toml`
//! 3. repo file `.spr.toml` at the working-tree root
//! 4. repo-private file `<git-dir>/spr/config.toml`

use crate::error::{Error, Result};
use crate::types::MergeMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Repo-level config filename
pub const REPO_CONFIG_FILE: &str = ".spr.toml";

/// Directory name for spr metadata within the git dir and the user config dir
const SPR_DIR: &str = "spr";

/// Filename inside [`SPR_DIR`]
const CONFIG_FILE: &str = "config.toml";

/// What to do with an open PR whose commit vanished from the stack without landing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisappearedPolicy {
    /// Close it with a comment
    #[default]
    Close,
    /// Leave it open and report it
    Keep,
}

/// Repository settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Remote to push to and fetch from
    pub remote: String,
    /// Branch the stack targets
    pub base_branch: String,
    /// Repository owner override (otherwise parsed from the remote URL)
    pub owner: Option<String>,
    /// Repository name override
    pub name: Option<String>,
    /// GitHub Enterprise host
    pub host: Option<String>,
    /// How PRs are merged
    pub merge_method: MergeMethod,
    /// Enqueue instead of merging directly
    pub merge_queue: bool,
    /// Require passing checks before merging
    pub require_checks: bool,
    /// Require an approving review before merging
    pub require_approval: bool,
    /// Push each branch on its own instead of atomically in batches
    pub push_individually: bool,
    /// Policy for PRs whose commit disappeared
    pub disappeared_policy: DisappearedPolicy,
    /// First path component of stack branch names
    pub branch_prefix: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
            owner: None,
            name: None,
            host: None,
            merge_method: MergeMethod::Squash,
            merge_queue: false,
            require_checks: true,
            require_approval: true,
            push_individually: false,
            disappeared_policy: DisappearedPolicy::Close,
            branch_prefix: "spr".to_string(),
        }
    }
}

impl RepoConfig {
    /// Remote-tracking ref of the base branch, e.g. `origin/main`
    pub fn base_ref(&self) -> String {
        format!("{}/{}", self.remote, self.base_branch)
    }
}

/// Per-user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Skip rebasing onto the fetched base before acting
    pub no_rebase: bool,
    /// Log every git command
    pub log_git_commands: bool,
    /// Budget for a single cherry-pick probe
    pub probe_timeout_secs: u64,
    /// Budget for a single remote call
    pub remote_timeout_secs: u64,
    /// Retries for transient remote failures
    pub max_retries: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            no_rebase: false,
            log_git_commands: false,
            probe_timeout_secs: 30,
            remote_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl UserConfig {
    /// Probe timeout as a `Duration`
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Remote call timeout as a `Duration`
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository section
    pub repo: RepoConfig,
    /// User section
    pub user: UserConfig,
}

/// Resolve the git directory of a working tree.
///
/// In linked worktrees `.git` is a plain text file (`gitdir: <path>`)
/// pointing at the real directory. Falls back to `<root>/.git` if the
/// pointer can't be followed, so the caller surfaces the error.
pub fn resolve_git_dir(workspace_root: &Path) -> PathBuf {
    let dot_git = workspace_root.join(".git");

    if dot_git.is_file() {
        if let Ok(contents) = fs::read_to_string(&dot_git)
            && let Some(target) = contents.trim().strip_prefix("gitdir:")
        {
            let target = PathBuf::from(target.trim());
            let target = if target.is_relative() {
                workspace_root.join(target)
            } else {
                target
            };
            if target.is_dir() {
                return fs::canonicalize(&target).unwrap_or(target);
            }
        }
        return dot_git;
    }

    dot_git
}

/// Path of the user config file, if a config dir exists on this platform
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(SPR_DIR).join(CONFIG_FILE))
}

/// Path of the committed repo config file
pub fn repo_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(REPO_CONFIG_FILE)
}

/// Path of the repo-private config file inside the git dir
pub fn private_config_path(workspace_root: &Path) -> PathBuf {
    resolve_git_dir(workspace_root).join(SPR_DIR).join(CONFIG_FILE)
}

/// Load the layered configuration for a working tree
pub fn load_config(workspace_root: &Path) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(user) = user_config_path() {
        layers.push(user);
    }
    layers.push(repo_config_path(workspace_root));
    layers.push(private_config_path(workspace_root));
    load_config_from(&layers)
}

/// Load configuration from explicit layers, lowest priority first.
///
/// Missing files are skipped.
pub fn load_config_from(layers: &[PathBuf]) -> Result<Config> {
    let mut merged = toml::Value::Table(toml::Table::new());

    for path in layers {
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let layer: toml::Value = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        merge_values(&mut merged, layer);
    }

    merged
        .try_into::<Config>()
        .map_err(|e| Error::Config(format!("invalid configuration: {e}")))
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_when_no_files() {
        let temp = TempDir::new().unwrap();
        let config = load_config_from(&[temp.path().join("missing.toml")]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.repo.base_ref(), "origin/main");
    }

    #[test]
    fn test_later_layer_overrides_single_key() {
        let temp = TempDir::new().unwrap();
        let user = write(&temp, "user.toml", "[repo]\nremote = \"upstream\"\nmerge_queue = true\n");
        let repo = write(&temp, "repo.toml", "[repo]\nmerge_queue = false\nmerge_method = \"rebase\"\n");

        let config = load_config_from(&[user, repo]).unwrap();
        assert_eq!(config.repo.remote, "upstream");
        assert!(!config.repo.merge_queue);
        assert_eq!(config.repo.merge_method, MergeMethod::Rebase);
        assert_eq!(config.repo.base_branch, "main");
    }

    #[test]
    fn test_disappeared_policy_parses() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "c.toml", "[repo]\ndisappeared_policy = \"keep\"\n");
        let config = load_config_from(&[path]).unwrap();
        assert_eq!(config.repo.disappeared_policy, DisappearedPolicy::Keep);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "bad.toml", "[repo\n");
        assert!(matches!(load_config_from(&[path]), Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve_git_dir_regular_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".git")).unwrap();
        let resolved = resolve_git_dir(temp.path());
        assert!(resolved.ends_with(".git"));
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_resolve_git_dir_pointer_file() {
        // main/.git/worktrees/wt  (real directory)
        // wt/.git                 (file: "gitdir: <path>")
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("main").join(".git").join("worktrees").join("wt");
        fs::create_dir_all(&real).unwrap();
        let worktree = temp.path().join("wt");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", real.display()),
        )
        .unwrap();

        let resolved = resolve_git_dir(&worktree);
        assert_eq!(resolved, fs::canonicalize(&real).unwrap());
    }

    #[test]
    fn test_resolve_git_dir_invalid_pointer_falls_back() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".git"), "gitdir: /nonexistent/path\n").unwrap();
        let resolved = resolve_git_dir(temp.path());
        assert_eq!(resolved, temp.path().join(".git"));
    }
}
