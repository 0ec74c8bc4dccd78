//! GitHub platform service implementation

use crate::error::{Error, Result};
use crate::platform::{BranchNaming, NewPullRequest, PlatformService};
use crate::types::{
    CheckState, MergeMethod, MergeResult, PlatformConfig, PrState, PrStatus, PullRequestRecord,
    ReviewState,
};
use crate::vcs::GitCli;
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

const LIST_OPEN_PRS_QUERY: &str = r"
    query ListOpenPullRequests($owner: String!, $repo: String!, $cursor: String) {
        repository(owner: $owner, name: $repo) {
            pullRequests(first: 100, after: $cursor, states: [OPEN], orderBy: {field: CREATED_AT, direction: ASC}) {
                pageInfo { hasNextPage endCursor }
                nodes {
                    number
                    url
                    title
                    isDraft
                    headRefName
                    baseRefName
                    headRefOid
                    mergeable
                    reviewDecision
                    commits(last: 1) {
                        nodes { commit { statusCheckRollup { state } } }
                    }
                }
            }
        }
    }
";

const ENQUEUE_MUTATION: &str = r"
    mutation EnqueuePullRequest($pullRequestId: ID!) {
        enqueuePullRequest(input: { pullRequestId: $pullRequestId }) {
            mergeQueueEntry { position }
        }
    }
";

// GraphQL response types

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct RepositoryData {
    repository: RepositoryNode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    pull_requests: PullRequestConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestConnection {
    page_info: PageInfo,
    nodes: Vec<GraphQlPullRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlPullRequest {
    number: u64,
    url: String,
    title: String,
    is_draft: bool,
    head_ref_name: String,
    base_ref_name: String,
    head_ref_oid: String,
    mergeable: Option<String>,
    review_decision: Option<String>,
    commits: CommitConnection,
}

#[derive(Deserialize)]
struct CommitConnection {
    nodes: Vec<CommitNode>,
}

#[derive(Deserialize)]
struct CommitNode {
    commit: CommitStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitStatus {
    status_check_rollup: Option<StatusRollup>,
}

#[derive(Deserialize)]
struct StatusRollup {
    state: String,
}

fn check_state(rollup: Option<&StatusRollup>) -> CheckState {
    match rollup.map(|r| r.state.as_str()) {
        Some("SUCCESS") => CheckState::Passing,
        Some("PENDING" | "EXPECTED") => CheckState::Pending,
        Some(_) => CheckState::Failing,
        None => CheckState::Missing,
    }
}

fn review_state(decision: Option<&str>) -> ReviewState {
    match decision {
        Some("APPROVED") => ReviewState::Approved,
        Some("CHANGES_REQUESTED") => ReviewState::ChangesRequested,
        Some("REVIEW_REQUIRED") => ReviewState::ReviewRequired,
        _ => ReviewState::None,
    }
}

fn mergeable(value: Option<&str>) -> Option<bool> {
    match value {
        Some("MERGEABLE") => Some(true),
        Some("CONFLICTING") => Some(false),
        _ => None,
    }
}

impl GraphQlPullRequest {
    fn into_record(self, naming: &BranchNaming) -> Option<PullRequestRecord> {
        let commit_id = naming.parse(&self.head_ref_name)?;
        let rollup = self
            .commits
            .nodes
            .first()
            .and_then(|n| n.commit.status_check_rollup.as_ref());
        let status = PrStatus {
            checks: check_state(rollup),
            review: review_state(self.review_decision.as_deref()),
            mergeable: mergeable(self.mergeable.as_deref()),
            is_draft: self.is_draft,
        };
        Some(PullRequestRecord {
            number: self.number,
            commit_id,
            head_branch: self.head_ref_name,
            base_branch: self.base_ref_name,
            head_commit: self.head_ref_oid,
            title: self.title,
            state: PrState::Open,
            status,
            html_url: self.url,
        })
    }
}

/// GitHub service using octocrab for REST and reqwest for GraphQL.
///
/// Head branches are pushed with the local `git` binary.
pub struct GitHubService {
    client: Octocrab,
    config: PlatformConfig,
    /// Token for raw GraphQL requests
    token: String,
    /// HTTP client for raw GraphQL requests
    http_client: Client,
    /// GraphQL endpoint
    graphql_url: String,
    git: GitCli,
    remote: String,
}

impl GitHubService {
    /// Create a new GitHub service pushing through `git` to `remote`
    pub fn new(token: &str, config: PlatformConfig, git: GitCli, remote: String) -> Result<Self> {
        let (rest_url, graphql_url) = match config.host.as_deref() {
            Some(h) => (format!("https://{h}/api/v3"), format!("https://{h}/api/graphql")),
            None => (
                "https://api.github.com".to_string(),
                "https://api.github.com/graphql".to_string(),
            ),
        };
        Self::with_endpoints(token, config, git, remote, &rest_url, graphql_url)
    }

    /// Create a service against explicit REST and GraphQL endpoints
    pub fn with_endpoints(
        token: &str,
        config: PlatformConfig,
        git: GitCli,
        remote: String,
        rest_url: &str,
        graphql_url: String,
    ) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .base_uri(rest_url)
            .map_err(|e| Error::GitHubApi(e.to_string()))?
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent("spr")
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            token: token.to_string(),
            http_client,
            graphql_url,
            git,
            remote,
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let response: GraphQlResponse<T> = self
            .http_client
            .post(&self.graphql_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse GraphQL response: {e}")))?;

        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(Error::GitHubApi(format!(
                "GraphQL error: {}",
                messages.join(", ")
            )));
        }

        response
            .data
            .ok_or_else(|| Error::GitHubApi("No data in GraphQL response".to_string()))
    }
}

fn refspec(branch: &str, commit: &str) -> String {
    format!("{commit}:refs/heads/{branch}")
}

#[async_trait]
impl PlatformService for GitHubService {
    async fn list_open_pull_requests(
        &self,
        naming: &BranchNaming,
    ) -> Result<Vec<PullRequestRecord>> {
        debug!(base = naming.base(), "listing open PRs");
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data: RepositoryData = self
                .graphql(serde_json::json!({
                    "query": LIST_OPEN_PRS_QUERY,
                    "variables": {
                        "owner": self.config.owner,
                        "repo": self.config.repo,
                        "cursor": cursor,
                    }
                }))
                .await?;

            let connection = data.repository.pull_requests;
            records.extend(
                connection
                    .nodes
                    .into_iter()
                    .filter_map(|pr| pr.into_record(naming)),
            );

            match connection.page_info.end_cursor {
                Some(next) if connection.page_info.has_next_page => cursor = Some(next),
                _ => break,
            }
        }

        debug!(count = records.len(), "listed open PRs");
        Ok(records)
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequestRecord> {
        debug!(
            head = %request.head_branch,
            base = %request.base_branch,
            "creating PR"
        );
        let pr = self
            .client
            .pulls(&self.config.owner, &self.config.repo)
            .create(&request.title, &request.head_branch, &request.base_branch)
            .body(&request.body)
            .send()
            .await?;

        let record = PullRequestRecord {
            number: pr.number,
            commit_id: request.commit_id.clone(),
            head_branch: request.head_branch.clone(),
            base_branch: request.base_branch.clone(),
            head_commit: request.head_commit.clone(),
            title: request.title.clone(),
            state: PrState::Open,
            status: PrStatus {
                is_draft: pr.draft.unwrap_or(false),
                ..PrStatus::default()
            },
            html_url: pr
                .html_url
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };
        debug!(pr_number = record.number, "created PR");
        Ok(record)
    }

    async fn update_pull_request_base(&self, number: u64, new_base: &str) -> Result<()> {
        debug!(pr_number = number, new_base, "updating PR base");
        self.client
            .pulls(&self.config.owner, &self.config.repo)
            .update(number)
            .base(new_base)
            .send()
            .await?;
        Ok(())
    }

    async fn update_pull_request_head(&self, head_branch: &str, new_commit: &str) -> Result<()> {
        debug!(head_branch, new_commit, "pushing head branch");
        self.git
            .push(&self.remote, &[refspec(head_branch, new_commit)], false)
            .await
    }

    async fn update_pull_request_heads(&self, updates: &[(String, String)]) -> Result<()> {
        debug!(count = updates.len(), "pushing head branches atomically");
        let refspecs: Vec<String> = updates.iter().map(|(b, c)| refspec(b, c)).collect();
        self.git.push(&self.remote, &refspecs, true).await
    }

    async fn comment_pull_request(&self, number: u64, body: &str) -> Result<()> {
        debug!(pr_number = number, "commenting on PR");
        self.client
            .issues(&self.config.owner, &self.config.repo)
            .create_comment(number, body)
            .await?;
        Ok(())
    }

    async fn close_pull_request(&self, number: u64) -> Result<()> {
        debug!(pr_number = number, "closing PR");
        self.client
            .issues(&self.config.owner, &self.config.repo)
            .update(number)
            .state(octocrab::models::IssueState::Closed)
            .send()
            .await?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()> {
        debug!(pr_number = number, ?reviewers, "requesting reviews");
        self.client
            .pulls(&self.config.owner, &self.config.repo)
            .request_reviews(number, reviewers.to_vec(), Vec::<String>::new())
            .await?;
        Ok(())
    }

    async fn merge_pull_request(&self, number: u64, method: MergeMethod) -> Result<MergeResult> {
        debug!(pr_number = number, %method, "merging PR");

        let octocrab_method = match method {
            MergeMethod::Squash => octocrab::params::pulls::MergeMethod::Squash,
            MergeMethod::Merge => octocrab::params::pulls::MergeMethod::Merge,
            MergeMethod::Rebase => octocrab::params::pulls::MergeMethod::Rebase,
        };

        let pulls = self.client.pulls(&self.config.owner, &self.config.repo);

        // Squash commits take the PR title and body
        let result = if method == MergeMethod::Squash {
            let pr = pulls.get(number).await?;
            let title = pr.title.unwrap_or_default();
            let mut builder = pulls.merge(number).method(octocrab_method);
            builder = builder.title(format!("{title} (#{number})"));
            if let Some(ref body) = pr.body {
                builder = builder.message(body);
            }
            builder.send().await?
        } else {
            pulls.merge(number).method(octocrab_method).send().await?
        };

        let merge_result = MergeResult {
            merged: result.merged,
            sha: result.sha,
            message: result.message,
        };
        debug!(
            pr_number = number,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn enqueue_for_merge_queue(&self, number: u64) -> Result<()> {
        debug!(pr_number = number, "enqueueing PR");
        let pr = self
            .client
            .pulls(&self.config.owner, &self.config.repo)
            .get(number)
            .await?;
        let node_id = pr.node_id.ok_or_else(|| {
            Error::GitHubApi("PR missing node_id for GraphQL mutation".to_string())
        })?;

        let _: serde_json::Value = self
            .graphql(serde_json::json!({
                "query": ENQUEUE_MUTATION,
                "variables": { "pullRequestId": node_id }
            }))
            .await?;
        debug!(pr_number = number, "enqueued PR");
        Ok(())
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
