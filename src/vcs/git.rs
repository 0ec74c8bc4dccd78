//! `git` subprocess implementation of [`VersionControl`]
//!
//! Scratch checkouts are detached linked worktrees under the common git dir,
//! so trial cherry-picks share the object database (materialised commits can
//! be pushed afterwards) without touching the user's working tree.

use super::{CherryPick, RawCommit, ScratchHandle, VersionControl};
use crate::error::{Error, Result};
use crate::stack::with_trailer;
use crate::types::{CommitId, GitRemote};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Separates records in `git log` output
const RECORD_SEP: char = '\u{1e}';

/// Separates fields inside one record
const FIELD_SEP: char = '\u{0}';

/// Directory under the common git dir holding scratch worktrees
const SCRATCH_DIR: &str = "spr-scratch";

struct GitOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Author/committer metadata needed to recreate a commit
struct CommitMeta {
    tree: String,
    parents: Vec<String>,
    author_name: String,
    author_email: String,
    author_date: String,
    committer_name: String,
    committer_email: String,
    committer_date: String,
    message: String,
}

/// Git repository driven through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    log_commands: bool,
    scratch_seq: Arc<AtomicU64>,
}

impl GitCli {
    /// Open the repository containing `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let probe = Self::new(path.to_path_buf());
        let top = probe.git(&["rev-parse", "--show-toplevel"]).await?;
        Ok(Self::new(PathBuf::from(top.trim())))
    }

    /// Wrap a working tree root without checking it
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            log_commands: false,
            scratch_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log every git invocation at info level
    #[must_use]
    pub const fn with_command_logging(mut self, enabled: bool) -> Self {
        self.log_commands = enabled;
        self
    }

    /// Working tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run_in(
        &self,
        dir: &Path,
        args: &[&str],
        stdin: Option<&str>,
        envs: &[(&str, &str)],
    ) -> Result<GitOutput> {
        if self.log_commands {
            info!("git {}", args.join(" "));
        } else {
            debug!(dir = %dir.display(), "git {}", args.join(" "));
        }

        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| Error::Git(format!("failed to write to git stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Git(format!("failed to wait for git: {e}")))?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let out = self.run_in(dir, args, None, &[]).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(Error::Git(format!(
                "git {}: {}",
                args.join(" "),
                out.stderr.trim()
            )))
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        self.git_in(&self.root, args).await
    }

    /// Resolve a revision to a full hash
    pub async fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self
            .git(&["rev-parse", "--verify", &format!("{rev}^{{commit}}")])
            .await?;
        Ok(out.trim().to_string())
    }

    /// Whether a revision exists
    pub async fn has_revision(&self, rev: &str) -> Result<bool> {
        let out = self
            .run_in(
                &self.root,
                &["rev-parse", "--verify", "--quiet", &format!("{rev}^{{commit}}")],
                None,
                &[],
            )
            .await?;
        Ok(out.success)
    }

    /// Name of the checked-out branch, `None` when HEAD is detached
    pub async fn current_branch(&self) -> Result<Option<String>> {
        let out = self
            .run_in(&self.root, &["symbolic-ref", "--short", "-q", "HEAD"], None, &[])
            .await?;
        Ok(out
            .success
            .then(|| out.stdout.trim().to_string())
            .filter(|b| !b.is_empty()))
    }

    /// Configured remotes (fetch URLs)
    pub async fn remotes(&self) -> Result<Vec<GitRemote>> {
        let out = self.git(&["remote", "-v"]).await?;
        Ok(parse_remotes(&out))
    }

    /// Fetch from a remote
    pub async fn fetch(&self, remote: &str) -> Result<()> {
        self.git(&["fetch", "--prune", remote]).await.map(drop)
    }

    /// Rebase the current branch onto `onto`, stashing local changes
    pub async fn rebase(&self, onto: &str) -> Result<()> {
        self.git(&["rebase", "--autostash", onto]).await.map(drop)
    }

    /// Force-push refspecs (`<commit>:refs/heads/<branch>`) to a remote.
    ///
    /// A rejected push is a remote error, classified from git's stderr;
    /// only failing to run git at all is local.
    pub async fn push(&self, remote: &str, refspecs: &[String], atomic: bool) -> Result<()> {
        if refspecs.is_empty() {
            return Ok(());
        }
        let mut args = vec!["push", "--force"];
        if atomic {
            args.push("--atomic");
        }
        args.push(remote);
        args.extend(refspecs.iter().map(String::as_str));
        let out = self.run_in(&self.root, &args, None, &[]).await?;
        if out.success {
            Ok(())
        } else {
            Err(Error::from_push_failure(&out.stderr))
        }
    }

    /// Absolute path of the git directory shared by all worktrees
    pub async fn common_git_dir(&self) -> Result<PathBuf> {
        let out = self
            .git(&["rev-parse", "--path-format=absolute", "--git-common-dir"])
            .await?;
        Ok(PathBuf::from(out.trim()))
    }

    async fn commit_meta(&self, hash: &str) -> Result<CommitMeta> {
        let out = self
            .git(&[
                "show",
                "-s",
                "--format=%T%x00%P%x00%an%x00%ae%x00%aI%x00%cn%x00%ce%x00%cI%x00%B",
                hash,
            ])
            .await?;
        let fields: Vec<&str> = out.splitn(9, FIELD_SEP).collect();
        let [tree, parents, an, ae, ad, cn, ce, cd, message] = fields.as_slice() else {
            return Err(Error::Git(format!("unexpected metadata for {hash}")));
        };
        Ok(CommitMeta {
            tree: (*tree).to_string(),
            parents: parents.split_whitespace().map(String::from).collect(),
            author_name: (*an).to_string(),
            author_email: (*ae).to_string(),
            author_date: (*ad).to_string(),
            committer_name: (*cn).to_string(),
            committer_email: (*ce).to_string(),
            committer_date: (*cd).to_string(),
            message: message.trim_end_matches('\n').to_string(),
        })
    }

    async fn commit_tree(&self, meta: &CommitMeta, parents: &[String], message: &str) -> Result<String> {
        let mut args = vec!["commit-tree", meta.tree.as_str()];
        for parent in parents {
            args.push("-p");
            args.push(parent);
        }
        args.extend(["-F", "-"]);

        let envs = [
            ("GIT_AUTHOR_NAME", meta.author_name.as_str()),
            ("GIT_AUTHOR_EMAIL", meta.author_email.as_str()),
            ("GIT_AUTHOR_DATE", meta.author_date.as_str()),
            ("GIT_COMMITTER_NAME", meta.committer_name.as_str()),
            ("GIT_COMMITTER_EMAIL", meta.committer_email.as_str()),
            ("GIT_COMMITTER_DATE", meta.committer_date.as_str()),
        ];
        let input = format!("{message}\n");
        let out = self.run_in(&self.root, &args, Some(&input), &envs).await?;
        if !out.success {
            return Err(Error::Git(format!("commit-tree failed: {}", out.stderr.trim())));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Ref to move when rewriting the history of `tip`; `None` for a
    /// detached HEAD
    async fn rewrite_ref(&self, tip: &str) -> Result<Option<String>> {
        if tip == "HEAD" {
            return self.current_symbolic_ref().await;
        }
        let out = self
            .run_in(&self.root, &["rev-parse", "--symbolic-full-name", tip], None, &[])
            .await?;
        let full = out.stdout.trim();
        if out.success && full.starts_with("refs/heads/") {
            Ok(Some(full.to_string()))
        } else {
            Err(Error::Git(format!(
                "cannot assign commit-ids on {tip}: not a local branch or HEAD"
            )))
        }
    }

    /// Point `reference` (or a detached HEAD) at `new`, guarded by `old`
    async fn move_ref(&self, reference: Option<&str>, new: &str, old: &str) -> Result<()> {
        let reason = "spr: assign commit-id";
        match reference {
            Some(reference) => {
                self.git(&["update-ref", "-m", reason, reference, new, old])
                    .await?;
            }
            None => {
                self.git(&["update-ref", "--no-deref", "-m", reason, "HEAD", new, old])
                    .await?;
            }
        }
        Ok(())
    }

    async fn current_symbolic_ref(&self) -> Result<Option<String>> {
        let out = self
            .run_in(&self.root, &["symbolic-ref", "-q", "HEAD"], None, &[])
            .await?;
        Ok(out.success.then(|| out.stdout.trim().to_string()))
    }
}

fn parse_remotes(output: &str) -> Vec<GitRemote> {
    let mut remotes: Vec<GitRemote> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url), Some("(fetch)")) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if !remotes.iter().any(|r| r.name == name) {
            remotes.push(GitRemote {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }
    remotes
}

fn parse_log(output: &str) -> Vec<RawCommit> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let (hash, message) = record.split_once(FIELD_SEP)?;
            let hash = hash.trim();
            (!hash.is_empty()).then(|| RawCommit {
                hash: hash.to_string(),
                message: message.trim_end_matches('\n').to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn resolve_range(&self, base: &str, tip: &str) -> Result<Vec<RawCommit>> {
        let range = format!("{base}..{tip}");
        let out = self
            .git(&["log", "--reverse", "--topo-order", "--format=%H%x00%B%x1e", &range])
            .await?;
        let commits = parse_log(&out);
        debug!(range, count = commits.len(), "resolved range");
        Ok(commits)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let out = self
            .run_in(
                &self.root,
                &["merge-base", "--is-ancestor", ancestor, descendant],
                None,
                &[],
            )
            .await?;
        match out.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::Git(format!(
                "merge-base --is-ancestor {ancestor} {descendant}: {}",
                out.stderr.trim()
            ))),
        }
    }

    async fn amend_trailer(&self, tip: &str, commit: &str, id: &CommitId) -> Result<()> {
        let reference = self.rewrite_ref(tip).await?;
        let head = self.rev_parse(tip).await?;
        let target = self.rev_parse(commit).await?;

        let above = self
            .git(&["rev-list", "--reverse", "--topo-order", &format!("{target}..{head}")])
            .await?;
        let mut rewrite = vec![target.clone()];
        rewrite.extend(above.lines().filter(|l| !l.is_empty()).map(String::from));

        let mut mapped: HashMap<String, String> = HashMap::new();
        for old in &rewrite {
            let meta = self.commit_meta(old).await?;
            let message = if *old == target {
                with_trailer(&meta.message, id)
            } else {
                meta.message.clone()
            };
            let parents: Vec<String> = meta
                .parents
                .iter()
                .map(|p| mapped.get(p).cloned().unwrap_or_else(|| p.clone()))
                .collect();
            let new = self.commit_tree(&meta, &parents, &message).await?;
            mapped.insert(old.clone(), new);
        }

        let new_head = mapped.get(&head).ok_or_else(|| {
            Error::Git(format!("{commit} is not an ancestor of {tip}; cannot amend"))
        })?;
        self.move_ref(reference.as_deref(), new_head, &head).await?;
        debug!(tip, commit, commit_id = %id, new_head, "amended commit-id trailer");
        Ok(())
    }

    async fn create_scratch_checkout(&self, base: &str) -> Result<ScratchHandle> {
        let scratch_err = |e: Error| Error::ScratchCheckout(e.to_string());

        let resolved = self.rev_parse(base).await.map_err(scratch_err)?;
        let git_dir = self.common_git_dir().await.map_err(scratch_err)?;
        let seq = self.scratch_seq.fetch_add(1, Ordering::SeqCst);
        let path = git_dir
            .join(SCRATCH_DIR)
            .join(format!("{}-{seq}", std::process::id()));
        let path_str = path.to_string_lossy().into_owned();

        self.git(&["worktree", "add", "--detach", "--quiet", &path_str, &resolved])
            .await
            .map_err(scratch_err)?;

        debug!(path = %path_str, base = %resolved, "created scratch checkout");
        Ok(ScratchHandle::new(path_str, resolved))
    }

    async fn move_scratch(&self, handle: &ScratchHandle, commit: &str) -> Result<()> {
        let dir = Path::new(handle.key());
        // Nothing to abort is the common case
        self.run_in(dir, &["cherry-pick", "--abort"], None, &[])
            .await?;
        self.git_in(dir, &["reset", "--hard", "--quiet", commit])
            .await?;
        self.git_in(dir, &["clean", "-fdq"]).await?;
        Ok(())
    }

    async fn cherry_pick(&self, handle: &ScratchHandle, commit: &str) -> Result<CherryPick> {
        let dir = Path::new(handle.key());
        // Same source and parent must give the same hash on every run
        let meta = self.commit_meta(commit).await?;
        let envs = [
            ("GIT_COMMITTER_NAME", meta.committer_name.as_str()),
            ("GIT_COMMITTER_EMAIL", meta.committer_email.as_str()),
            ("GIT_COMMITTER_DATE", meta.committer_date.as_str()),
        ];
        let out = self
            .run_in(
                dir,
                &["cherry-pick", "--allow-empty", "--keep-redundant-commits", commit],
                None,
                &envs,
            )
            .await?;

        if out.success {
            let head = self.git_in(dir, &["rev-parse", "HEAD"]).await?;
            return Ok(CherryPick::Applied {
                commit: head.trim().to_string(),
            });
        }

        debug!(commit, stderr = %out.stderr.trim(), "cherry-pick did not apply");
        self.run_in(dir, &["cherry-pick", "--abort"], None, &[])
            .await?;
        Ok(CherryPick::Conflict)
    }

    async fn discard(&self, handle: ScratchHandle) -> Result<()> {
        self.git(&["worktree", "remove", "--force", handle.key()])
            .await?;
        self.git(&["worktree", "prune"]).await?;
        debug!(path = handle.key(), "discarded scratch checkout");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_records() {
        let output = "abc\u{0}Add A\n\ncommit-id:aaaaaaaa\n\u{1e}\ndef\u{0}Add B\n\u{1e}\n";
        let commits = parse_log(output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "abc");
        assert_eq!(commits[0].message, "Add A\n\ncommit-id:aaaaaaaa");
        assert_eq!(commits[1].hash, "def");
        assert_eq!(commits[1].message, "Add B");
    }

    #[test]
    fn test_parse_log_empty() {
        assert!(parse_log("").is_empty());
    }

    #[test]
    fn test_parse_remotes_dedupes_fetch_push() {
        let output = "origin\tgit@github.com:o/r.git (fetch)\n\
                      origin\tgit@github.com:o/r.git (push)\n\
                      upstream\thttps://github.com/u/r (fetch)\n";
        let remotes = parse_remotes(output);
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[1].url, "https://github.com/u/r");
    }
}
