//! Snapshot types describing a pull request and its merge gates.
//!
//! These are re-fetched fresh for every evaluation. GitHub computes
//! `mergeable` and `merge_state_status` asynchronously, so staleness is
//! expected and handled by polling, never by client-side caching.

use serde::{Deserialize, Serialize};

use crate::types::Sha;

/// GitHub's tri-state answer to "can this PR merge cleanly?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeableState {
    Mergeable,
    Conflicting,
    /// GitHub has not finished computing mergeability. Try again later.
    Unknown,
}

/// GitHub's richer explanation of *why* a PR may not be mergeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStateStatus {
    /// Head branch is out of date with the base branch.
    Behind,
    /// Blocked by a branch protection requirement (reviews or checks).
    Blocked,
    Clean,
    /// Merge conflict.
    Dirty,
    Draft,
    HasHooks,
    Unknown,
    /// Non-required checks are pending or failing.
    Unstable,
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// The merge strategies GitHub supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    /// The string the REST merge endpoint expects.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// A fresh snapshot of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestFacts {
    /// GraphQL node ID.
    pub id: String,
    pub number: u64,
    /// Login of the PR author.
    pub author: String,
    pub labels: Vec<String>,
    pub title: String,
    /// Raw markdown body.
    pub body: String,
    /// Body rendered to plain text.
    pub body_text: String,
    /// Body rendered to HTML.
    pub body_html: String,
    pub merge_state_status: MergeStateStatus,
    pub mergeable: MergeableState,
    /// True when the head branch lives in a fork.
    pub is_cross_repository: bool,
    pub base_ref_name: String,
    pub head_ref_name: String,
    /// SHA of the latest commit; status reports attach here.
    pub latest_sha: Sha,
    pub state: PullRequestState,
    pub is_draft: bool,
}

/// The repository-level gate configured for a branch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchProtectionRule {
    pub requires_approving_reviews: bool,
    pub required_approving_review_count: Option<u32>,
    pub requires_status_checks: bool,
    pub required_status_check_contexts: Vec<String>,
    /// "Require branches to be up to date before merging".
    pub requires_strict_status_checks: bool,
    pub requires_commit_signatures: bool,
    pub restricts_pushes: bool,
    /// Logins allowed to push when `restricts_pushes` is set.
    pub push_allowances: Vec<String>,
    pub requires_conversation_resolution: bool,
}

/// The decision-relevant state of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

/// Repository permission of a review author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Admin,
    Maintain,
    Write,
    Triage,
    Read,
    None,
}

impl Permission {
    /// Whether this permission level can produce reviews that count toward
    /// branch protection.
    pub fn can_approve(&self) -> bool {
        matches!(self, Permission::Admin | Permission::Maintain | Permission::Write)
    }
}

/// One review, in submission order within the review list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub state: ReviewState,
    pub author_permission: Permission,
}

/// An outstanding request for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Login or team slug of the requested reviewer.
    pub name: String,
}

/// State of a commit status context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusState {
    Error,
    Expected,
    Failure,
    Pending,
    Success,
}

/// A commit status (the older status API).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContext {
    pub context: String,
    pub state: StatusState,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckConclusion {
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Skipped,
    Stale,
    Success,
    TimedOut,
}

/// A check run (the newer checks API). `conclusion` is `None` while running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub conclusion: Option<CheckConclusion>,
}

/// An author of a commit on the PR, for co-author trailers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
    pub login: Option<String>,
}

/// Repository-level toggles relevant to evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryFlags {
    pub is_private: bool,
    /// GitHub's own "automatically delete head branches" setting. When on,
    /// the bot must not also delete branches.
    pub delete_branch_on_merge: bool,
}

/// Why an account's subscription blocks merging, if it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionBlocker {
    /// e.g. "seats_exceeded", "trial_expired", "subscription_expired".
    pub kind: String,
    /// Users exempt from the block (already-licensed seats).
    #[serde(default)]
    pub allowed_user_logins: Vec<String>,
}

/// Account-level billing state, fetched from the side store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub account_id: String,
    pub blocker: Option<SubscriptionBlocker>,
}
