//! Cherry-pick probing
//!
//! Every probe resets one scratch checkout to base, replays a candidate
//! prerequisite set in stack order, then the commit under test. The scratch
//! checkout is created once, reused sequentially, and always discarded.

use crate::analyze::graph::DependencyGraph;
use crate::error::{Error, Result};
use crate::progress::{Phase, ProgressCallback};
use crate::types::{CommitEntry, CommitId};
use crate::vcs::{CherryPick, ScratchHandle, VersionControl};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// What a commit needs to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Applies cleanly on the base alone
    Independent,
    /// Applies only after `on`
    Dependent {
        /// Prerequisites in stack order
        on: Vec<CommitId>,
        /// No smaller set was found; `on` is the whole prefix
        exhausted: bool,
    },
}

/// Analysis result for one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAnalysis {
    /// Commit-id
    pub commit_id: CommitId,
    /// Commit hash
    pub hash: String,
    /// Subject line
    pub subject: String,
    /// Dependency verdict
    pub dependency: Dependency,
}

impl CommitAnalysis {
    /// Abbreviated hash for display
    pub fn short_hash(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

/// Result of analysing a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Per-commit verdicts, in stack order
    pub commits: Vec<CommitAnalysis>,
    /// Dependency edges between stack positions
    pub graph: DependencyGraph,
    /// Number of cherry-pick replays actually run
    pub probes: usize,
}

impl Analysis {
    /// Stack positions of independent commits
    pub fn independent(&self) -> Vec<usize> {
        self.positions(|d| matches!(d, Dependency::Independent))
    }

    /// Stack positions of commits with a minimal prerequisite set
    pub fn dependent(&self) -> Vec<usize> {
        self.positions(|d| {
            matches!(
                d,
                Dependency::Dependent {
                    exhausted: false,
                    ..
                }
            )
        })
    }

    /// Stack positions of commits that only apply on the whole prefix
    pub fn orphaned(&self) -> Vec<usize> {
        self.positions(|d| matches!(d, Dependency::Dependent { exhausted: true, .. }))
    }

    fn positions(&self, pred: impl Fn(&Dependency) -> bool) -> Vec<usize> {
        self.commits
            .iter()
            .enumerate()
            .filter(|(_, c)| pred(&c.dependency))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Options for stack analysis
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Budget for a single probe; exceeding it counts as a conflict
    pub probe_timeout: Duration,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Probe driver bound to one scratch checkout
pub(crate) struct Prober<'a> {
    vcs: &'a dyn VersionControl,
    handle: &'a ScratchHandle,
    hashes: Vec<&'a str>,
    timeout: Duration,
    memo: HashMap<(usize, Vec<usize>), bool>,
    probes: usize,
}

impl<'a> Prober<'a> {
    pub(crate) fn new(
        vcs: &'a dyn VersionControl,
        handle: &'a ScratchHandle,
        entries: &'a [CommitEntry],
        timeout: Duration,
    ) -> Self {
        Self {
            vcs,
            handle,
            hashes: entries.iter().map(|e| e.hash.as_str()).collect(),
            timeout,
            memo: HashMap::new(),
            probes: 0,
        }
    }

    /// Whether `commit` applies on base after `prereqs` (replayed in order)
    async fn applies(&mut self, commit: usize, prereqs: &BTreeSet<usize>) -> Result<bool> {
        let key = (commit, prereqs.iter().copied().collect::<Vec<_>>());
        if let Some(&hit) = self.memo.get(&key) {
            return Ok(hit);
        }

        let mut sequence: Vec<&str> = prereqs.iter().map(|&p| self.hashes[p]).collect();
        sequence.push(self.hashes[commit]);

        self.probes += 1;
        let outcome = match tokio::time::timeout(self.timeout, self.replay(&sequence)).await {
            Ok(result) => result?.is_some(),
            Err(_) => {
                debug!(commit = self.hashes[commit], "probe timed out, counting as conflict");
                false
            }
        };
        self.memo.insert(key, outcome);
        Ok(outcome)
    }

    /// Replay `sequence` on a fresh base; `None` on the first conflict
    pub(crate) async fn replay(&self, sequence: &[&str]) -> Result<Option<String>> {
        self.vcs.reset_scratch(self.handle).await?;
        let mut head = None;
        for commit in sequence {
            match self.vcs.cherry_pick(self.handle, commit).await? {
                CherryPick::Applied { commit } => head = Some(commit),
                CherryPick::Conflict => return Ok(None),
            }
        }
        Ok(head)
    }

    /// Drop elements (oldest first) while the commit still applies.
    ///
    /// Dropping one element can make an earlier one droppable, so passes
    /// repeat until one removes nothing.
    async fn minimise(&mut self, commit: usize, mut set: BTreeSet<usize>) -> Result<BTreeSet<usize>> {
        loop {
            let mut dropped = false;
            let candidates: Vec<usize> = set.iter().copied().collect();
            for x in candidates {
                let mut smaller = set.clone();
                smaller.remove(&x);
                if self.applies(commit, &smaller).await? {
                    set = smaller;
                    dropped = true;
                }
            }
            if !dropped {
                return Ok(set);
            }
        }
    }

    /// Find a minimal prerequisite set for `commit`.
    ///
    /// `closure[j]` is the prerequisite set already found for earlier `j`.
    async fn search(
        &mut self,
        commit: usize,
        closure: &[BTreeSet<usize>],
    ) -> Result<Option<BTreeSet<usize>>> {
        if self.applies(commit, &BTreeSet::new()).await? {
            return Ok(Some(BTreeSet::new()));
        }

        let with_closure = |j: usize| {
            let mut set = closure[j].clone();
            set.insert(j);
            set
        };

        // Single candidates, closest first
        for j in (0..commit).rev() {
            let set = with_closure(j);
            if self.applies(commit, &set).await? {
                return self.minimise(commit, set).await.map(Some);
            }
        }

        // Accretion, most recent first
        let mut set = BTreeSet::new();
        for j in (0..commit).rev() {
            set.extend(with_closure(j));
            if self.applies(commit, &set).await? {
                return self.minimise(commit, set).await.map(Some);
            }
        }

        Ok(None)
    }

    /// Probes run so far
    pub(crate) const fn probes(&self) -> usize {
        self.probes
    }
}

/// Create the scratch checkout, mapping any provider failure to
/// [`Error::ScratchCheckout`]
pub(crate) async fn acquire_scratch(vcs: &dyn VersionControl, base: &str) -> Result<ScratchHandle> {
    vcs.create_scratch_checkout(base)
        .await
        .map_err(|e| match e {
            Error::ScratchCheckout(_) => e,
            other => Error::ScratchCheckout(other.to_string()),
        })
}

/// Discard the scratch checkout, then surface `result`
pub(crate) async fn release_scratch<T>(
    vcs: &dyn VersionControl,
    handle: ScratchHandle,
    result: Result<T>,
) -> Result<T> {
    let discarded = vcs.discard(handle).await;
    let value = result?;
    discarded?;
    Ok(value)
}

/// Classify every commit of `entries` as independent or dependent (EFFECTFUL)
///
/// `base` must be the commit the stack sits on. Conflicts are data, not
/// errors; only a failing scratch checkout or a broken provider fails.
pub async fn analyze_stack(
    vcs: &dyn VersionControl,
    base: &str,
    entries: &[CommitEntry],
    options: &AnalyzeOptions,
    progress: &dyn ProgressCallback,
) -> Result<Analysis> {
    progress.on_phase(Phase::Probing).await;
    let handle = acquire_scratch(vcs, base).await?;
    let result = classify(vcs, &handle, entries, options, progress).await;
    release_scratch(vcs, handle, result).await
}

async fn classify(
    vcs: &dyn VersionControl,
    handle: &ScratchHandle,
    entries: &[CommitEntry],
    options: &AnalyzeOptions,
    progress: &dyn ProgressCallback,
) -> Result<Analysis> {
    let mut prober = Prober::new(vcs, handle, entries, options.probe_timeout);
    let mut closure: Vec<BTreeSet<usize>> = Vec::with_capacity(entries.len());
    let mut graph = DependencyGraph::new(entries.iter().map(|e| e.commit_id.clone()).collect());
    let mut commits = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        progress
            .on_message(&format!("Probing {} {}", entry.short_hash(), entry.subject))
            .await;

        let (set, exhausted) = match prober.search(i, &closure).await? {
            Some(set) => (set, false),
            None => ((0..i).collect(), true),
        };

        for &p in &set {
            graph.add_dependency(i, p);
        }
        let dependency = if set.is_empty() {
            Dependency::Independent
        } else {
            Dependency::Dependent {
                on: set.iter().map(|&p| entries[p].commit_id.clone()).collect(),
                exhausted,
            }
        };
        debug!(commit_id = %entry.commit_id, ?dependency, "classified commit");

        commits.push(CommitAnalysis {
            commit_id: entry.commit_id.clone(),
            hash: entry.hash.clone(),
            subject: entry.subject.clone(),
            dependency,
        });
        closure.push(set);
    }

    info!(
        commits = entries.len(),
        probes = prober.probes(),
        "dependency analysis complete"
    );
    Ok(Analysis {
        commits,
        graph,
        probes: prober.probes(),
    })
}
