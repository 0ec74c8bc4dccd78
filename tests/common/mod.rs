//! Shared test helpers

#![allow(dead_code)]

pub mod memory_vcs;
pub mod mock_platform;

pub use memory_vcs::{BASE, MemoryVcs, TIP};
pub use mock_platform::{Call, MockPlatform};

use spr::platform::BranchNaming;
use spr::types::{
    CheckState, CommitEntry, CommitId, PrState, PrStatus, PullRequestRecord, ReviewState,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Commit-id from a small number, e.g. `id(3)` = `00000003`
pub fn id(n: u32) -> CommitId {
    CommitId::parse(&format!("{n:08x}")).unwrap()
}

/// Naming used throughout the tests
pub fn naming() -> BranchNaming {
    BranchNaming::new("spr", "main")
}

/// A stack entry with a fake hash
pub fn entry(n: u32, hash: &str) -> CommitEntry {
    let commit_id = id(n);
    CommitEntry {
        hash: hash.to_string(),
        subject: format!("Commit {n}"),
        message: format!("Commit {n}\n\nBody of {n}\n\ncommit-id:{commit_id}"),
        commit_id,
    }
}

/// Open PR for commit `n`, based on `base` (`None` = main)
pub fn make_pr(n: u32, number: u64, base: Option<u32>, head: &str) -> PullRequestRecord {
    let naming = naming();
    PullRequestRecord {
        number,
        commit_id: id(n),
        head_branch: naming.branch_for(&id(n)),
        base_branch: base.map_or_else(|| "main".to_string(), |b| naming.branch_for(&id(b))),
        head_commit: head.to_string(),
        title: format!("Commit {n}"),
        state: PrState::Open,
        status: PrStatus::default(),
        html_url: format!("https://github.com/test/repo/pull/{number}"),
    }
}

/// Status that passes every gate
pub fn green() -> PrStatus {
    PrStatus {
        checks: CheckState::Passing,
        review: ReviewState::Approved,
        mergeable: Some(true),
        is_draft: false,
    }
}

/// Whether a usable `git` binary is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Throwaway git repository with a `main` branch and identity configured
pub struct TempGitRepo {
    dir: TempDir,
}

impl TempGitRepo {
    /// Initialise; `None` when git is unavailable
    pub fn new() -> Option<Self> {
        if !git_available() {
            return None;
        }
        let repo = Self {
            dir: TempDir::new().unwrap(),
        };
        repo.git(&["init", "--quiet", "--initial-branch=main"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        Some(repo)
    }

    /// Working tree root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Canonical working tree root (what `git rev-parse --show-toplevel` reports)
    pub fn canonical_path(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    /// Run git, panicking on failure; returns trimmed stdout
    pub fn git(&self, args: &[&str]) -> String {
        let out = Command::new("git")
            .arg("-C")
            .arg(self.dir.path())
            .args(args)
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Write files and commit them; returns the new hash
    pub fn commit(&self, message: &str, files: &[(&str, &str)]) -> String {
        for (path, content) in files {
            std::fs::write(self.dir.path().join(path), content).unwrap();
            self.git(&["add", path]);
        }
        self.git(&["commit", "--quiet", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }
}
