//! Typed REST/GraphQL client for the GitHub API.
//!
//! One combined GraphQL query per evaluation fetches everything the engine
//! needs: PR facts, branch protection, reviews, check runs, status
//! contexts, commit authors, repository flags, and the repo's config file.
//! Mutations go through REST.
//!
//! Every call acquires a throttler slot for its installation and
//! authenticates with a cached installation token.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::error::GitHubApiError;
use super::throttle::Throttler;
use super::token::TokenCache;
use crate::types::{
    BranchProtectionRule, CheckConclusion, CheckRun, CommitAuthor, InstallationId, MergeMethod,
    MergeStateStatus, MergeableState, Permission, PrNumber, PullRequestFacts, PullRequestState,
    RepoId, RepositoryFlags, Review, ReviewRequest, ReviewState, Sha, StatusContext,
};
use crate::webhooks::ingest::{OpenPr, OpenPrSource};

/// Check run name under which the bot reports status on PRs.
pub const STATUS_CHECK_NAME: &str = "automerge";

/// Everything one evaluation needs, fetched in a single GraphQL round trip.
#[derive(Debug, Clone)]
pub struct PrSnapshot {
    /// Raw text of the repo's config file, if present on the default branch.
    pub config_text: Option<String>,
    pub pr: PullRequestFacts,
    /// `None` when no branch protection rule matches the PR's base ref.
    pub branch_protection: Option<BranchProtectionRule>,
    /// In submission order; the engine keeps the most recent state per author.
    pub reviews: Vec<Review>,
    pub review_requests: Vec<ReviewRequest>,
    pub status_contexts: Vec<StatusContext>,
    pub check_runs: Vec<CheckRun>,
    pub commit_authors: Vec<CommitAuthor>,
    pub repository: RepositoryFlags,
    pub valid_merge_methods: Vec<MergeMethod>,
}

/// The GitHub API client.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<TokenCache>,
    throttler: Arc<Throttler>,
}

impl GitHubClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        tokens: Arc<TokenCache>,
        throttler: Arc<Throttler>,
    ) -> Self {
        GitHubClient {
            http,
            api_base: api_base.into(),
            tokens,
            throttler,
        }
    }

    /// Performs one authenticated, throttled REST call. Returns the response
    /// body on 2xx.
    async fn request(
        &self,
        installation: InstallationId,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, GitHubApiError> {
        let label = format!("{} {}", method, path);
        let token = self.tokens.get(installation).await?;
        self.throttler.acquire(installation).await;

        let url = format!("{}/{}", self.api_base, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "automerge-bot");
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(call = %label, "github api call");
        let response = request
            .send()
            .await
            .map_err(|e| GitHubApiError::from_transport(&label, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GitHubApiError::from_transport(&label, &e))?;
        if !status.is_success() {
            return Err(GitHubApiError::from_response(&label, status.as_u16(), &text));
        }
        Ok(text)
    }

    // ─── Snapshot query ───────────────────────────────────────────────────────

    /// Fetches the full evaluation snapshot for a PR.
    pub async fn pr_snapshot(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr_number: PrNumber,
    ) -> Result<PrSnapshot, GitHubApiError> {
        let label = "POST graphql (pr snapshot)".to_string();
        let token = self.tokens.get(installation).await?;
        self.throttler.acquire(installation).await;

        let variables = json!({
            "owner": repo.owner,
            "repo": repo.repo,
            "number": pr_number.0,
            "configExpression": format!("HEAD:{}", crate::config::CONFIG_FILE_PATH),
        });
        let response = self
            .http
            .post(format!("{}/graphql", self.api_base))
            .bearer_auth(token)
            .header("User-Agent", "automerge-bot")
            .json(&json!({"query": SNAPSHOT_QUERY, "variables": variables}))
            .send()
            .await
            .map_err(|e| GitHubApiError::from_transport(&label, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GitHubApiError::from_transport(&label, &e))?;
        if !status.is_success() {
            return Err(GitHubApiError::from_response(&label, status.as_u16(), &text));
        }

        decode_snapshot(&text)
            .map_err(|e| GitHubApiError::permanent(&label, format!("bad graphql response: {e}")))
    }

    // ─── Mutations ────────────────────────────────────────────────────────────

    /// Merges the PR. An HTTP 500 here is fatal for the PR (the caller
    /// disables the bot on it); other failures follow the usual taxonomy.
    pub async fn merge_pr(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
        method: MergeMethod,
        commit_title: Option<String>,
        commit_message: Option<String>,
    ) -> Result<(), GitHubApiError> {
        let mut body = json!({"merge_method": method.as_api_str()});
        if let Some(title) = commit_title {
            body["commit_title"] = json!(title);
        }
        if let Some(message) = commit_message {
            body["commit_message"] = json!(message);
        }
        self.request(
            installation,
            Method::PUT,
            &format!("repos/{}/pulls/{}/merge", repo, pr.0),
            Some(body),
        )
        .await?;
        Ok(())
    }

    /// Merges the PR's base branch into its head branch.
    pub async fn update_branch(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::PUT,
            &format!("repos/{}/pulls/{}/update-branch", repo, pr.0),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    /// Submits an approving review from the bot.
    pub async fn approve_pr(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::POST,
            &format!("repos/{}/pulls/{}/reviews", repo, pr.0),
            Some(json!({"event": "APPROVE"})),
        )
        .await?;
        Ok(())
    }

    pub async fn add_label(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
        label: &str,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::POST,
            &format!("repos/{}/issues/{}/labels", repo, pr.0),
            Some(json!({"labels": [label]})),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_label(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
        label: &str,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::DELETE,
            &format!(
                "repos/{}/issues/{}/labels/{}",
                repo,
                pr.0,
                urlencoding::encode(label)
            ),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn create_comment(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
        body: &str,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::POST,
            &format!("repos/{}/issues/{}/comments", repo, pr.0),
            Some(json!({"body": body})),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_branch(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        branch: &str,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::DELETE,
            &format!(
                "repos/{}/git/refs/heads/{}",
                repo,
                urlencoding::encode(branch)
            ),
            None,
        )
        .await?;
        Ok(())
    }

    /// Asks GitHub to (re)compute mergeability. Requesting the PR through
    /// REST makes GitHub start building the test merge commit that feeds
    /// `mergeable`, which GraphQL alone does not trigger.
    pub async fn trigger_test_merge_commit(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        pr: PrNumber,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::GET,
            &format!("repos/{}/pulls/{}", repo, pr.0),
            None,
        )
        .await?;
        Ok(())
    }

    /// Reports status on a PR head by creating a completed neutral check run
    /// named [`STATUS_CHECK_NAME`].
    pub async fn create_check_run(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        sha: &Sha,
        title: &str,
        summary: Option<String>,
    ) -> Result<(), GitHubApiError> {
        self.request(
            installation,
            Method::POST,
            &format!("repos/{}/check-runs", repo),
            Some(json!({
                "name": STATUS_CHECK_NAME,
                "head_sha": sha.as_str(),
                "status": "completed",
                "conclusion": "neutral",
                "output": {
                    "title": truncate_output(title, CHECK_RUN_TITLE_LIMIT),
                    "summary": truncate_output(
                        &summary.unwrap_or_default(),
                        CHECK_RUN_SUMMARY_LIMIT,
                    ),
                },
            })),
        )
        .await?;
        Ok(())
    }
}

/// GitHub rejects check-run titles past this length.
const CHECK_RUN_TITLE_LIMIT: usize = 1024;

/// GitHub rejects check-run summaries past 65535 characters.
const CHECK_RUN_SUMMARY_LIMIT: usize = 65535;

/// Cuts check-run output to a GitHub field limit, on a char boundary, with
/// an ellipsis marking the cut.
fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit - '…'.len_utf8();
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[async_trait]
impl OpenPrSource for GitHubClient {
    async fn open_prs(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        base: Option<&str>,
        head: Option<&str>,
    ) -> Result<Vec<OpenPr>, GitHubApiError> {
        let mut path = format!("repos/{}/pulls?state=open&per_page=100", repo);
        if let Some(base) = base {
            path.push_str(&format!("&base={}", urlencoding::encode(base)));
        }
        if let Some(head) = head {
            path.push_str(&format!("&head={}", urlencoding::encode(head)));
        }
        let body = self.request(installation, Method::GET, &path, None).await?;

        #[derive(Deserialize)]
        struct RestRef {
            #[serde(rename = "ref")]
            ref_name: String,
        }
        #[derive(Deserialize)]
        struct RestPr {
            number: u64,
            base: RestRef,
            head: RestRef,
        }
        let prs: Vec<RestPr> = serde_json::from_str(&body).map_err(|e| {
            GitHubApiError::permanent("GET pulls", format!("bad list response: {e}"))
        })?;
        Ok(prs
            .into_iter()
            .map(|pr| OpenPr {
                number: PrNumber(pr.number),
                base_ref: pr.base.ref_name,
                head_ref: pr.head.ref_name,
            })
            .collect())
    }
}

// ─── GraphQL decoding ─────────────────────────────────────────────────────────

const SNAPSHOT_QUERY: &str = r#"
query ($owner: String!, $repo: String!, $number: Int!, $configExpression: String!) {
  repository(owner: $owner, name: $repo) {
    isPrivate
    deleteBranchOnMerge
    mergeCommitAllowed
    squashMergeAllowed
    rebaseMergeAllowed
    object(expression: $configExpression) {
      ... on Blob { text }
    }
    pullRequest(number: $number) {
      id
      number
      author { login }
      title
      body
      bodyText
      bodyHTML
      mergeStateStatus
      mergeable
      isCrossRepository
      isDraft
      state
      baseRefName
      headRefName
      baseRef {
        branchProtectionRule {
          requiresApprovingReviews
          requiredApprovingReviewCount
          requiresStatusChecks
          requiredStatusCheckContexts
          requiresStrictStatusChecks
          requiresCommitSignatures
          requiresConversationResolution
          restrictsPushes
          pushAllowances(first: 100) {
            nodes {
              actor {
                ... on App { name }
                ... on Team { slug }
                ... on User { login }
              }
            }
          }
        }
      }
      labels(first: 100) { nodes { name } }
      reviewRequests(first: 100) {
        nodes {
          requestedReviewer {
            ... on User { login }
            ... on Team { slug }
          }
        }
      }
      reviews(first: 100) { nodes { author { login } state authorAssociation } }
      commits(first: 100) {
        nodes { commit { author { name email user { login } } } }
      }
      latestCommit: commits(last: 1) {
        nodes {
          commit {
            oid
            status { contexts { context state } }
            checkSuites(first: 100) {
              nodes {
                checkRuns(first: 100) { nodes { name conclusion } }
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<GqlData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GqlData {
    repository: Option<GqlRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlRepository {
    is_private: bool,
    delete_branch_on_merge: bool,
    merge_commit_allowed: bool,
    squash_merge_allowed: bool,
    rebase_merge_allowed: bool,
    object: Option<GqlBlob>,
    pull_request: Option<GqlPullRequest>,
}

#[derive(Debug, Deserialize)]
struct GqlBlob {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GqlActorLogin {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlPullRequest {
    id: String,
    number: u64,
    author: Option<GqlActorLogin>,
    title: String,
    body: String,
    body_text: String,
    #[serde(rename = "bodyHTML")]
    body_html: String,
    merge_state_status: MergeStateStatus,
    mergeable: MergeableState,
    is_cross_repository: bool,
    is_draft: bool,
    state: PullRequestState,
    base_ref_name: String,
    head_ref_name: String,
    base_ref: Option<GqlBaseRef>,
    labels: GqlNodes<GqlLabel>,
    review_requests: GqlNodes<GqlReviewRequest>,
    reviews: GqlNodes<GqlReview>,
    commits: GqlNodes<GqlCommitNode>,
    latest_commit: GqlNodes<GqlLatestCommitNode>,
}

#[derive(Debug, Deserialize)]
struct GqlNodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlBaseRef {
    branch_protection_rule: Option<GqlBranchProtectionRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlBranchProtectionRule {
    requires_approving_reviews: bool,
    required_approving_review_count: Option<u32>,
    requires_status_checks: bool,
    #[serde(default)]
    required_status_check_contexts: Vec<String>,
    requires_strict_status_checks: bool,
    requires_commit_signatures: bool,
    requires_conversation_resolution: bool,
    restricts_pushes: bool,
    push_allowances: GqlNodes<GqlPushAllowance>,
}

#[derive(Debug, Deserialize)]
struct GqlPushAllowance {
    actor: Option<GqlAllowanceActor>,
}

#[derive(Debug, Deserialize)]
struct GqlAllowanceActor {
    login: Option<String>,
    slug: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GqlLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlReviewRequest {
    requested_reviewer: Option<GqlAllowanceActor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlReview {
    author: Option<GqlActorLogin>,
    state: ReviewState,
    author_association: String,
}

#[derive(Debug, Deserialize)]
struct GqlCommitNode {
    commit: GqlCommitAuthorHolder,
}

#[derive(Debug, Deserialize)]
struct GqlCommitAuthorHolder {
    author: Option<GqlGitActor>,
}

#[derive(Debug, Deserialize)]
struct GqlGitActor {
    name: Option<String>,
    email: Option<String>,
    user: Option<GqlActorLogin>,
}

#[derive(Debug, Deserialize)]
struct GqlLatestCommitNode {
    commit: GqlLatestCommit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlLatestCommit {
    oid: String,
    status: Option<GqlStatus>,
    check_suites: GqlNodes<GqlCheckSuite>,
}

#[derive(Debug, Deserialize)]
struct GqlStatus {
    #[serde(default)]
    contexts: Vec<StatusContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlCheckSuite {
    check_runs: GqlNodes<GqlCheckRun>,
}

#[derive(Debug, Deserialize)]
struct GqlCheckRun {
    name: String,
    conclusion: Option<CheckConclusion>,
}

/// GraphQL has no per-review repository permission; `authorAssociation` is
/// the closest signal. Owners count as admin, members and collaborators as
/// write, everyone else as read.
fn permission_from_association(association: &str) -> Permission {
    match association {
        "OWNER" => Permission::Admin,
        "MEMBER" | "COLLABORATOR" => Permission::Write,
        _ => Permission::Read,
    }
}

fn decode_snapshot(body: &str) -> Result<PrSnapshot, String> {
    let envelope: GraphQlEnvelope = serde_json::from_str(body).map_err(|e| e.to_string())?;
    if !envelope.errors.is_empty() {
        return Err(format!("graphql errors: {:?}", envelope.errors));
    }
    let repo = envelope
        .data
        .and_then(|d| d.repository)
        .ok_or("repository not found")?;
    let pr = repo.pull_request.ok_or("pull request not found")?;
    let latest = pr
        .latest_commit
        .nodes
        .into_iter()
        .next()
        .ok_or("pull request has no commits")?
        .commit;

    let branch_protection = pr.base_ref.and_then(|r| r.branch_protection_rule).map(|rule| {
        BranchProtectionRule {
            requires_approving_reviews: rule.requires_approving_reviews,
            required_approving_review_count: rule.required_approving_review_count,
            requires_status_checks: rule.requires_status_checks,
            required_status_check_contexts: rule.required_status_check_contexts,
            requires_strict_status_checks: rule.requires_strict_status_checks,
            requires_commit_signatures: rule.requires_commit_signatures,
            restricts_pushes: rule.restricts_pushes,
            push_allowances: rule
                .push_allowances
                .nodes
                .into_iter()
                .filter_map(|a| a.actor)
                .filter_map(|a| a.login.or(a.slug).or(a.name))
                .collect(),
            requires_conversation_resolution: rule.requires_conversation_resolution,
        }
    });

    let mut valid_merge_methods = Vec::new();
    if repo.merge_commit_allowed {
        valid_merge_methods.push(MergeMethod::Merge);
    }
    if repo.squash_merge_allowed {
        valid_merge_methods.push(MergeMethod::Squash);
    }
    if repo.rebase_merge_allowed {
        valid_merge_methods.push(MergeMethod::Rebase);
    }

    let facts = PullRequestFacts {
        id: pr.id,
        number: pr.number,
        author: pr.author.and_then(|a| a.login).unwrap_or_default(),
        labels: pr.labels.nodes.into_iter().map(|l| l.name).collect(),
        title: pr.title,
        body: pr.body,
        body_text: pr.body_text,
        body_html: pr.body_html,
        merge_state_status: pr.merge_state_status,
        mergeable: pr.mergeable,
        is_cross_repository: pr.is_cross_repository,
        base_ref_name: pr.base_ref_name,
        head_ref_name: pr.head_ref_name,
        latest_sha: Sha::new(latest.oid),
        state: pr.state,
        is_draft: pr.is_draft,
    };

    Ok(PrSnapshot {
        config_text: repo.object.and_then(|b| b.text),
        pr: facts,
        branch_protection,
        reviews: pr
            .reviews
            .nodes
            .into_iter()
            .map(|r| Review {
                author: r.author.and_then(|a| a.login).unwrap_or_default(),
                state: r.state,
                author_permission: permission_from_association(&r.author_association),
            })
            .collect(),
        review_requests: pr
            .review_requests
            .nodes
            .into_iter()
            .filter_map(|r| r.requested_reviewer)
            .filter_map(|a| a.login.or(a.slug))
            .map(|name| ReviewRequest { name })
            .collect(),
        status_contexts: latest.status.map(|s| s.contexts).unwrap_or_default(),
        check_runs: latest
            .check_suites
            .nodes
            .into_iter()
            .flat_map(|suite| suite.check_runs.nodes)
            .map(|run| CheckRun {
                name: run.name,
                conclusion: run.conclusion,
            })
            .collect(),
        commit_authors: pr
            .commits
            .nodes
            .into_iter()
            .filter_map(|c| c.commit.author)
            .filter_map(|a| match (a.name, a.email) {
                (Some(name), Some(email)) => Some(CommitAuthor {
                    name,
                    email,
                    login: a.user.and_then(|u| u.login),
                }),
                _ => None,
            })
            .collect(),
        repository: RepositoryFlags {
            is_private: repo.is_private,
            delete_branch_on_merge: repo.delete_branch_on_merge,
        },
        valid_merge_methods,
    })
}
