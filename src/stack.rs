//! Commit stack model
//!
//! Reads `base..tip` into a [`LocalStack`] and makes sure every commit carries
//! a `commit-id:` trailer, amending the ones that don't.

use crate::error::{Error, Result};
use crate::types::{CommitEntry, CommitId, LocalStack};
use crate::vcs::{RawCommit, VersionControl};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Trailer key
pub const TRAILER_KEY: &str = "commit-id";

static TRAILER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^commit-id:([0-9a-f]{8})\s*$").expect("trailer regex is valid")
});

/// Extract the commit-id trailer; the last matching line wins
pub fn parse_trailer(message: &str) -> Option<CommitId> {
    message
        .lines()
        .rev()
        .find_map(|line| TRAILER_RE.captures(line.trim_end()))
        .and_then(|caps| CommitId::parse(&caps[1]).ok())
}

/// Append a trailer to `message`. No-op if it already carries `id`.
pub fn with_trailer(message: &str, id: &CommitId) -> String {
    if parse_trailer(message).as_ref() == Some(id) {
        return message.to_string();
    }
    let trimmed = message.trim_end();
    format!("{trimmed}\n\n{TRAILER_KEY}:{id}")
}

/// Remove every trailer line (and the blank line before it)
pub fn strip_trailer(message: &str) -> String {
    let kept: Vec<&str> = message
        .lines()
        .filter(|line| !TRAILER_RE.is_match(line.trim_end()))
        .collect();
    kept.join("\n").trim_end().to_string()
}

fn subject_of(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

/// Fail on two commits sharing a trailer
fn check_duplicates(commits: &[RawCommit], ids: &[Option<CommitId>]) -> Result<()> {
    let mut seen: HashMap<&CommitId, &str> = HashMap::new();
    for (commit, id) in commits.iter().zip(ids) {
        let Some(id) = id else { continue };
        if let Some(first) = seen.insert(id, &commit.hash) {
            return Err(Error::DuplicateCommitId {
                commit_id: id.to_string(),
                first: first.to_string(),
                second: commit.hash.clone(),
            });
        }
    }
    Ok(())
}

/// Build the local stack for `base..tip`, assigning missing commit-ids.
///
/// Missing trailers are written back oldest-first, one amend at a time,
/// re-reading the range after each (an amend rewrites everything above it).
/// On an unchanged, fully-tagged range this performs no writes.
pub async fn build_local_stack(
    vcs: &dyn VersionControl,
    base: &str,
    tip: &str,
) -> Result<LocalStack> {
    if !vcs.is_ancestor(base, tip).await? {
        return Err(Error::AmbiguousRange {
            base: base.to_string(),
            tip: tip.to_string(),
        });
    }

    let mut amends = 0;
    loop {
        let commits = vcs.resolve_range(base, tip).await?;
        let ids: Vec<Option<CommitId>> = commits.iter().map(|c| vcs.read_trailer(c)).collect();
        check_duplicates(&commits, &ids)?;

        let Some(missing) = ids.iter().position(Option::is_none) else {
            let entries = commits
                .into_iter()
                .zip(ids.into_iter().flatten())
                .map(|(raw, commit_id)| CommitEntry {
                    subject: subject_of(&raw.message),
                    hash: raw.hash,
                    commit_id,
                    message: raw.message,
                })
                .collect::<Vec<_>>();
            debug!(base, tip, count = entries.len(), "built local stack");
            return Ok(LocalStack {
                base: base.to_string(),
                entries,
            });
        };

        // Each amend tags one more commit of the range
        if amends >= commits.len() {
            return Err(Error::Internal(format!(
                "commit-ids on {base}..{tip} still missing after {amends} amends"
            )));
        }
        amends += 1;

        let taken: HashSet<CommitId> = ids.iter().flatten().cloned().collect();
        let id = CommitId::generate(&taken);
        let commit = &commits[missing];
        info!(commit = %commit.hash, commit_id = %id, "assigning commit-id");
        vcs.amend_trailer(tip, &commit.hash, &id).await?;
    }
}
