//! Mock platform service for testing
//!
//! Keeps a small in-memory model of open PRs so that a second reconciliation
//! sees the effect of the first, and records every call in one ordered log.

#![allow(dead_code)]

use async_trait::async_trait;
use spr::error::{Error, Result};
use spr::platform::{BranchNaming, NewPullRequest, PlatformService};
use spr::types::{
    MergeMethod, MergeResult, PlatformConfig, PrState, PrStatus, PullRequestRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `list_open_pull_requests`
    List,
    /// `create_pull_request`
    Create {
        head: String,
        base: String,
        title: String,
    },
    /// `update_pull_request_base`
    UpdateBase { number: u64, new_base: String },
    /// `update_pull_request_head`
    UpdateHead { branch: String, commit: String },
    /// `update_pull_request_heads`
    UpdateHeads(Vec<(String, String)>),
    /// `comment_pull_request`
    Comment { number: u64, body: String },
    /// `close_pull_request`
    Close { number: u64 },
    /// `request_reviewers`
    RequestReviewers { number: u64, reviewers: Vec<String> },
    /// `merge_pull_request`
    Merge { number: u64, method: MergeMethod },
    /// `enqueue_for_merge_queue`
    Enqueue { number: u64 },
}

impl Call {
    /// PR number the call targets, if any
    pub const fn number(&self) -> Option<u64> {
        match self {
            Self::UpdateBase { number, .. }
            | Self::Comment { number, .. }
            | Self::Close { number }
            | Self::RequestReviewers { number, .. }
            | Self::Merge { number, .. }
            | Self::Enqueue { number } => Some(*number),
            _ => None,
        }
    }
}

/// Injected failure
#[derive(Debug, Clone)]
enum Fault {
    Permanent(String),
    Transient { remaining: u32 },
}

/// Mock platform service
///
/// Features:
/// - Auto-incrementing PR numbers
/// - Open PRs mutate as calls succeed (heads, bases, closes, merges)
/// - Single ordered call log
/// - Permanent and scripted transient failures per operation and target
pub struct MockPlatform {
    config: PlatformConfig,
    next_pr_number: AtomicU64,
    prs: Mutex<BTreeMap<u64, PullRequestRecord>>,
    branches: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashMap<String, Fault>>,
    merge_responses: Mutex<HashMap<u64, MergeResult>>,
}

impl MockPlatform {
    /// Empty repository `test/repo`
    pub fn new() -> Self {
        Self {
            config: PlatformConfig {
                owner: "test".to_string(),
                repo: "repo".to_string(),
                host: None,
            },
            next_pr_number: AtomicU64::new(1),
            prs: Mutex::new(BTreeMap::new()),
            branches: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            merge_responses: Mutex::new(HashMap::new()),
        }
    }

    // === Setup ===

    /// Seed an open PR; later creates get higher numbers
    pub fn add_pr(&self, record: PullRequestRecord) {
        let next = self.next_pr_number.load(Ordering::SeqCst).max(record.number + 1);
        self.next_pr_number.store(next, Ordering::SeqCst);
        self.branches
            .lock()
            .unwrap()
            .insert(record.head_branch.clone(), record.head_commit.clone());
        self.prs.lock().unwrap().insert(record.number, record);
    }

    /// Change the check/review snapshot of a PR
    pub fn set_status(&self, number: u64, status: PrStatus) {
        if let Some(pr) = self.prs.lock().unwrap().get_mut(&number) {
            pr.status = status;
        }
    }

    /// Set the response for `merge_pull_request` for a specific PR
    pub fn set_merge_response(&self, number: u64, result: MergeResult) {
        self.merge_responses.lock().unwrap().insert(number, result);
    }

    // === Error injection ===

    /// Fail `op` (e.g. "create", "update_base", "merge") permanently.
    ///
    /// `target` narrows it to one PR number or head branch.
    pub fn fail(&self, op: &str, target: Option<&str>, message: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(fault_key(op, target), Fault::Permanent(message.to_string()));
    }

    /// Fail `op` with a transient error `times` times, then succeed
    pub fn fail_transiently(&self, op: &str, target: Option<&str>, times: u32) {
        self.faults
            .lock()
            .unwrap()
            .insert(fault_key(op, target), Fault::Transient { remaining: times });
    }

    fn check_fault(&self, op: &str, target: &str) -> Result<()> {
        let mut faults = self.faults.lock().unwrap();
        for key in [fault_key(op, Some(target)), fault_key(op, None)] {
            match faults.get_mut(&key) {
                Some(Fault::Permanent(msg)) => return Err(Error::GitHubApi(msg.clone())),
                Some(Fault::Transient { remaining }) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(Error::Transient(format!("{op} {target}: 502 Bad Gateway")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    // === Call verification ===

    /// Every call, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change remote state (everything but listing)
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List))
            .collect()
    }

    /// Forget recorded calls, keep PR state
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Open PRs, by number
    pub fn open_prs(&self) -> Vec<PullRequestRecord> {
        self.prs.lock().unwrap().values().cloned().collect()
    }

    /// The open PR for a head branch
    pub fn pr_for_branch(&self, branch: &str) -> Option<PullRequestRecord> {
        self.prs
            .lock()
            .unwrap()
            .values()
            .find(|p| p.head_branch == branch)
            .cloned()
    }

    /// Commit a head branch points at
    pub fn branch_head(&self, branch: &str) -> Option<String> {
        self.branches.lock().unwrap().get(branch).cloned()
    }

    /// PR numbers passed to `merge_pull_request`, in order
    pub fn merged_numbers(&self) -> Vec<u64> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Merge { number, .. } => Some(*number),
                _ => None,
            })
            .collect()
    }

    /// Assert that `merge_pull_request` was NOT called for a specific PR
    pub fn assert_merge_not_called(&self, number: u64) {
        let merged = self.merged_numbers();
        assert!(
            !merged.contains(&number),
            "Expected merge({number}) NOT to be called but got: {merged:?}"
        );
    }

    fn push_head(&self, branch: &str, commit: &str) {
        self.branches
            .lock()
            .unwrap()
            .insert(branch.to_string(), commit.to_string());
        for pr in self.prs.lock().unwrap().values_mut() {
            if pr.head_branch == branch {
                pr.head_commit = commit.to_string();
            }
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn fault_key(op: &str, target: Option<&str>) -> String {
    target.map_or_else(|| op.to_string(), |t| format!("{op}:{t}"))
}

#[async_trait]
impl PlatformService for MockPlatform {
    async fn list_open_pull_requests(
        &self,
        naming: &BranchNaming,
    ) -> Result<Vec<PullRequestRecord>> {
        self.record(Call::List);
        self.check_fault("list", "")?;
        Ok(self
            .prs
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.state == PrState::Open && naming.matches(&p.head_branch))
            .cloned()
            .collect())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequestRecord> {
        self.record(Call::Create {
            head: request.head_branch.clone(),
            base: request.base_branch.clone(),
            title: request.title.clone(),
        });
        self.check_fault("create", &request.head_branch)?;

        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst);
        let record = PullRequestRecord {
            number,
            commit_id: request.commit_id.clone(),
            head_branch: request.head_branch.clone(),
            base_branch: request.base_branch.clone(),
            head_commit: request.head_commit.clone(),
            title: request.title.clone(),
            state: PrState::Open,
            status: PrStatus::default(),
            html_url: format!("https://github.com/test/repo/pull/{number}"),
        };
        self.prs.lock().unwrap().insert(number, record.clone());
        Ok(record)
    }

    async fn update_pull_request_base(&self, number: u64, new_base: &str) -> Result<()> {
        self.record(Call::UpdateBase {
            number,
            new_base: new_base.to_string(),
        });
        self.check_fault("update_base", &number.to_string())?;
        if let Some(pr) = self.prs.lock().unwrap().get_mut(&number) {
            pr.base_branch = new_base.to_string();
        }
        Ok(())
    }

    async fn update_pull_request_head(&self, head_branch: &str, new_commit: &str) -> Result<()> {
        self.record(Call::UpdateHead {
            branch: head_branch.to_string(),
            commit: new_commit.to_string(),
        });
        self.check_fault("update_head", head_branch)?;
        self.push_head(head_branch, new_commit);
        Ok(())
    }

    async fn update_pull_request_heads(&self, updates: &[(String, String)]) -> Result<()> {
        self.record(Call::UpdateHeads(updates.to_vec()));
        for (branch, _) in updates {
            self.check_fault("update_head", branch)?;
        }
        for (branch, commit) in updates {
            self.push_head(branch, commit);
        }
        Ok(())
    }

    async fn comment_pull_request(&self, number: u64, body: &str) -> Result<()> {
        self.record(Call::Comment {
            number,
            body: body.to_string(),
        });
        self.check_fault("comment", &number.to_string())
    }

    async fn close_pull_request(&self, number: u64) -> Result<()> {
        self.record(Call::Close { number });
        self.check_fault("close", &number.to_string())?;
        if let Some(pr) = self.prs.lock().unwrap().get_mut(&number) {
            pr.state = PrState::Closed;
        }
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()> {
        self.record(Call::RequestReviewers {
            number,
            reviewers: reviewers.to_vec(),
        });
        self.check_fault("reviewers", &number.to_string())
    }

    async fn merge_pull_request(&self, number: u64, method: MergeMethod) -> Result<MergeResult> {
        self.record(Call::Merge { number, method });
        self.check_fault("merge", &number.to_string())?;

        let result = self
            .merge_responses
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_else(|| MergeResult {
                merged: true,
                sha: Some(format!("merged_sha_{number}")),
                message: None,
            });
        if result.merged
            && let Some(pr) = self.prs.lock().unwrap().get_mut(&number)
        {
            pr.state = PrState::Merged;
        }
        Ok(result)
    }

    async fn enqueue_for_merge_queue(&self, number: u64) -> Result<()> {
        self.record(Call::Enqueue { number });
        self.check_fault("enqueue", &number.to_string())
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
