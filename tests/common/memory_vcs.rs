//! In-memory repository for analyzer and stack tests
//!
//! Commits are file edits with expected pre-images. A cherry-pick applies
//! only if every edited file still has the content the commit expects, which
//! is enough to model textual conflicts without a real git.

#![allow(dead_code)]

use async_trait::async_trait;
use spr::error::{Error, Result};
use spr::stack::with_trailer;
use spr::types::CommitId;
use spr::vcs::{CherryPick, RawCommit, ScratchHandle, VersionControl};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// One file change: `before` must match for the edit to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub path: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone)]
struct Commit {
    parent: Option<String>,
    message: String,
    edits: Vec<Edit>,
}

#[derive(Debug, Default)]
struct Inner {
    commits: HashMap<String, Commit>,
    refs: HashMap<String, String>,
    scratch: HashMap<String, String>,
    next_hash: u64,
    next_scratch: u64,
    amends: usize,
    picks: usize,
    discarded: usize,
    fail_scratch: bool,
    drop_amends: bool,
}

impl Inner {
    fn new_hash(&mut self) -> String {
        self.next_hash += 1;
        format!("{:040x}", self.next_hash)
    }

    fn resolve(&self, rev: &str) -> Result<String> {
        if let Some(hash) = self.refs.get(rev) {
            return Ok(hash.clone());
        }
        if self.commits.contains_key(rev) {
            return Ok(rev.to_string());
        }
        Err(Error::Git(format!("unknown revision {rev}")))
    }

    fn ancestry(&self, hash: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = Some(hash.to_string());
        while let Some(h) = cur {
            cur = self.commits.get(&h).and_then(|c| c.parent.clone());
            out.push(h);
        }
        out
    }

    fn tree(&self, hash: &str) -> BTreeMap<String, String> {
        let mut chain = self.ancestry(hash);
        chain.reverse();
        let mut tree = BTreeMap::new();
        for h in chain {
            for edit in &self.commits[&h].edits {
                match &edit.after {
                    Some(content) => tree.insert(edit.path.clone(), content.clone()),
                    None => tree.remove(&edit.path),
                };
            }
        }
        tree
    }

    fn add_commit(&mut self, parent: Option<String>, message: String, edits: Vec<Edit>) -> String {
        let hash = self.new_hash();
        self.commits.insert(
            hash.clone(),
            Commit {
                parent,
                message,
                edits,
            },
        );
        hash
    }
}

/// Content-model repository implementing [`VersionControl`]
///
/// Refs: `origin/main` is the base, `HEAD` the tip of the stack.
pub struct MemoryVcs {
    inner: Mutex<Inner>,
}

pub const BASE: &str = "origin/main";
pub const TIP: &str = "HEAD";

impl MemoryVcs {
    /// Repository with one root commit writing `files`; both refs on it
    pub fn with_base(files: &[(&str, &str)]) -> Self {
        let mut inner = Inner::default();
        let edits = files
            .iter()
            .map(|(path, content)| Edit {
                path: (*path).to_string(),
                before: None,
                after: Some((*content).to_string()),
            })
            .collect();
        let root = inner.add_commit(None, "Initial commit".to_string(), edits);
        inner.refs.insert(BASE.to_string(), root.clone());
        inner.refs.insert(TIP.to_string(), root);
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Commit on `HEAD` setting `files` to new contents; returns the hash
    pub fn commit(&self, message: &str, files: &[(&str, &str)]) -> String {
        let mut inner = self.inner.lock().unwrap();
        let head = inner.refs[TIP].clone();
        let tree = inner.tree(&head);
        let edits = files
            .iter()
            .map(|(path, content)| Edit {
                path: (*path).to_string(),
                before: tree.get(*path).cloned(),
                after: Some((*content).to_string()),
            })
            .collect();
        let hash = inner.add_commit(Some(head), message.to_string(), edits);
        inner.refs.insert(TIP.to_string(), hash.clone());
        hash
    }

    /// Commit on `HEAD` with a fixed trailer
    pub fn commit_with_id(&self, subject: &str, id: &str, files: &[(&str, &str)]) -> String {
        let id = CommitId::parse(id).unwrap();
        self.commit(&with_trailer(subject, &id), files)
    }

    /// Rewrite the message of `hash` and everything above it on `HEAD`
    pub fn reword(&self, hash: &str, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        rewrite_from(&mut inner, TIP, hash, message);
    }

    /// Move the commits on `HEAD` above the base to a new ref `name`, and
    /// put `HEAD` back on the base
    pub fn move_to_branch(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let head = inner.refs[TIP].clone();
        let base = inner.refs[BASE].clone();
        inner.refs.insert(name.to_string(), head);
        inner.refs.insert(TIP.to_string(), base);
    }

    /// Point a ref somewhere else
    pub fn set_ref(&self, name: &str, hash: &str) {
        self.inner
            .lock()
            .unwrap()
            .refs
            .insert(name.to_string(), hash.to_string());
    }

    /// Current hash of a ref
    pub fn ref_hash(&self, name: &str) -> String {
        self.inner.lock().unwrap().refs[name].clone()
    }

    /// File contents at a commit
    pub fn tree_at(&self, hash: &str) -> BTreeMap<String, String> {
        self.inner.lock().unwrap().tree(hash)
    }

    /// Parent of a commit
    pub fn parent_of(&self, hash: &str) -> Option<String> {
        self.inner.lock().unwrap().commits[hash].parent.clone()
    }

    /// Message of a commit
    pub fn message_of(&self, hash: &str) -> String {
        self.inner.lock().unwrap().commits[hash].message.clone()
    }

    /// Make `create_scratch_checkout` fail
    pub fn fail_scratch(&self) {
        self.inner.lock().unwrap().fail_scratch = true;
    }

    /// Make `amend_trailer` report success without rewriting anything
    pub fn drop_amends(&self) {
        self.inner.lock().unwrap().drop_amends = true;
    }

    /// Number of trailer amends performed
    pub fn amend_count(&self) -> usize {
        self.inner.lock().unwrap().amends
    }

    /// Number of cherry-picks attempted
    pub fn pick_count(&self) -> usize {
        self.inner.lock().unwrap().picks
    }

    /// Scratch checkouts still alive
    pub fn live_scratch(&self) -> usize {
        self.inner.lock().unwrap().scratch.len()
    }

    /// Scratch checkouts released so far
    pub fn discarded(&self) -> usize {
        self.inner.lock().unwrap().discarded
    }
}

fn rewrite_from(inner: &mut Inner, tip_ref: &str, hash: &str, message: &str) {
    let tip = inner.refs[tip_ref].clone();
    let mut chain = inner.ancestry(&tip);
    chain.reverse();
    let Some(start) = chain.iter().position(|h| h == hash) else {
        return;
    };

    let mut parent = inner.commits[hash].parent.clone();
    for (i, old) in chain[start..].iter().enumerate() {
        let commit = inner.commits[old].clone();
        let new_message = if i == 0 {
            message.to_string()
        } else {
            commit.message
        };
        let new = inner.add_commit(parent.clone(), new_message, commit.edits);
        parent = Some(new);
    }
    if let Some(new_tip) = parent {
        inner.refs.insert(tip_ref.to_string(), new_tip);
    }
}

#[async_trait]
impl VersionControl for MemoryVcs {
    async fn resolve_range(&self, base: &str, tip: &str) -> Result<Vec<RawCommit>> {
        let inner = self.inner.lock().unwrap();
        let base = inner.resolve(base)?;
        let tip = inner.resolve(tip)?;
        let mut out = Vec::new();
        for hash in inner.ancestry(&tip) {
            if hash == base {
                break;
            }
            out.push(RawCommit {
                message: inner.commits[&hash].message.clone(),
                hash,
            });
        }
        out.reverse();
        Ok(out)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        let ancestor = inner.resolve(ancestor)?;
        let descendant = inner.resolve(descendant)?;
        Ok(inner.ancestry(&descendant).contains(&ancestor))
    }

    async fn amend_trailer(&self, tip: &str, commit: &str, id: &CommitId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.refs.contains_key(tip) {
            return Err(Error::Git(format!("{tip} is not a branch")));
        }
        let message = inner
            .commits
            .get(commit)
            .map(|c| with_trailer(&c.message, id))
            .ok_or_else(|| Error::Git(format!("unknown commit {commit}")))?;
        inner.amends += 1;
        if !inner.drop_amends {
            rewrite_from(&mut inner, tip, commit, &message);
        }
        Ok(())
    }

    async fn create_scratch_checkout(&self, base: &str) -> Result<ScratchHandle> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_scratch {
            return Err(Error::ScratchCheckout("disk full".to_string()));
        }
        let base = inner.resolve(base)?;
        inner.next_scratch += 1;
        let key = format!("scratch-{}", inner.next_scratch);
        inner.scratch.insert(key.clone(), base.clone());
        Ok(ScratchHandle::new(key, base))
    }

    async fn move_scratch(&self, handle: &ScratchHandle, commit: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let commit = inner.resolve(commit)?;
        let slot = inner
            .scratch
            .get_mut(handle.key())
            .ok_or_else(|| Error::ScratchCheckout(format!("unknown checkout {}", handle.key())))?;
        *slot = commit;
        Ok(())
    }

    async fn cherry_pick(&self, handle: &ScratchHandle, commit: &str) -> Result<CherryPick> {
        let mut inner = self.inner.lock().unwrap();
        inner.picks += 1;
        let head = inner
            .scratch
            .get(handle.key())
            .cloned()
            .ok_or_else(|| Error::ScratchCheckout(format!("unknown checkout {}", handle.key())))?;
        let picked = inner
            .commits
            .get(commit)
            .cloned()
            .ok_or_else(|| Error::Git(format!("unknown commit {commit}")))?;

        let tree = inner.tree(&head);
        let applies = picked
            .edits
            .iter()
            .all(|e| tree.get(&e.path) == e.before.as_ref());
        if !applies {
            return Ok(CherryPick::Conflict);
        }

        let new = inner.add_commit(Some(head), picked.message, picked.edits);
        inner.scratch.insert(handle.key().to_string(), new.clone());
        Ok(CherryPick::Applied { commit: new })
    }

    async fn discard(&self, handle: ScratchHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.scratch.remove(handle.key());
        inner.discarded += 1;
        Ok(())
    }
}
