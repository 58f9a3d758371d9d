//! Binds the evaluation engine to the live GitHub client and queues.
//!
//! The controller assembles a fresh [`EvalInput`] per evaluation (snapshot
//! query, config parse, billing read, active-merge check), hands it to the
//! engine with a [`LivePrApi`], and interprets the engine's outcome:
//!
//! - passive mode runs one evaluation per webhook event
//! - merging mode wraps evaluations in the retry policy: unbounded polling
//!   on [`Evaluation::PollAgain`], a bounded budget for skippable checks, a
//!   bounded budget for transient API failures, and a hard timeout per
//!   attempt that requeues the PR instead of wedging the worker

pub mod workers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ParsedConfig;
use crate::engine::api::{ApiResult, PrApi};
use crate::engine::{EvalInput, Evaluation, evaluate};
use crate::github::{GitHubApiError, GitHubClient, GitHubErrorKind};
use crate::queue::store::StoreError;
use crate::queue::{MergeQueue, QueueStore, keys};
use crate::types::{
    InstallationId, MergeMethod, PrNumber, Sha, Subscription, SubscriptionBlocker, WebhookEvent,
};
use crate::webhooks::ingest::OpenPrSource;

/// Sleep between evaluations while a PR is progressing (branch update or
/// required checks running).
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Sleep between evaluations while only skippable checks are incomplete.
pub const SKIPPABLE_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How many times to re-evaluate for incomplete skippable checks before
/// reporting a timeout.
pub const SKIPPABLE_CHECK_BUDGET: u32 = 4;

/// Transient API failures tolerated within one evaluation cycle.
pub const API_RETRY_BUDGET: u32 = 5;

/// Sleep between transient-API retries.
pub const API_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Hard cap on one full evaluation attempt. On expiry the PR goes to the
/// back of its queue rather than blocking the merge worker.
pub const EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Api(#[from] GitHubApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a merging-mode run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRun {
    /// Terminal outcome (merged, blocked, abandoned); the worker removes the
    /// queue entry.
    Completed,
    /// The attempt timed out and the PR was pushed to the back of the queue;
    /// its entry must survive.
    Requeued,
}

/// Store failures observed inside a [`PrApi`] call are reported through the
/// API error taxonomy so the same retry budget covers them.
fn store_api_error(op: &str, err: StoreError) -> GitHubApiError {
    GitHubApiError {
        kind: GitHubErrorKind::Transient,
        method: op.to_string(),
        status_code: None,
        body: err.to_string(),
    }
}

// ─── Live capability binding ──────────────────────────────────────────────────

/// Production [`PrApi`]: one pull request, one evaluation.
struct LivePrApi {
    client: Arc<GitHubClient>,
    queue: MergeQueue,
    event: WebhookEvent,
    /// Head SHA from the snapshot this evaluation is based on; status
    /// reports attach here.
    sha: Sha,
}

impl LivePrApi {
    fn pr(&self) -> PrNumber {
        self.event.pr_number
    }

    fn installation(&self) -> InstallationId {
        self.event.installation_id
    }
}

#[async_trait]
impl PrApi for LivePrApi {
    async fn dequeue(&self) -> ApiResult<()> {
        self.queue
            .remove(&self.event)
            .await
            .map_err(|e| store_api_error("ZREM merge_queue", e))?;
        Ok(())
    }

    async fn requeue(&self) -> ApiResult<()> {
        self.queue
            .enqueue(&self.event, false)
            .await
            .map_err(|e| store_api_error("ZADD merge_queue", e))?;
        Ok(())
    }

    async fn set_status(&self, summary: &str, detail: Option<&str>) -> ApiResult<()> {
        self.client
            .create_check_run(
                self.installation(),
                &self.event.repo_id(),
                &self.sha,
                summary,
                detail.map(str::to_string),
            )
            .await
    }

    async fn merge(
        &self,
        method: MergeMethod,
        title: Option<&str>,
        body: Option<&str>,
    ) -> ApiResult<()> {
        self.client
            .merge_pr(
                self.installation(),
                &self.event.repo_id(),
                self.pr(),
                method,
                title.map(str::to_string),
                body.map(str::to_string),
            )
            .await
    }

    async fn update_branch(&self) -> ApiResult<()> {
        self.client
            .update_branch(self.installation(), &self.event.repo_id(), self.pr())
            .await
    }

    async fn approve_pr(&self) -> ApiResult<()> {
        self.client
            .approve_pr(self.installation(), &self.event.repo_id(), self.pr())
            .await
    }

    async fn add_label(&self, label: &str) -> ApiResult<()> {
        self.client
            .add_label(self.installation(), &self.event.repo_id(), self.pr(), label)
            .await
    }

    async fn remove_label(&self, label: &str) -> ApiResult<()> {
        self.client
            .remove_label(self.installation(), &self.event.repo_id(), self.pr(), label)
            .await
    }

    async fn create_comment(&self, body: &str) -> ApiResult<()> {
        self.client
            .create_comment(self.installation(), &self.event.repo_id(), self.pr(), body)
            .await
    }

    async fn queue_for_merge(&self, first: bool) -> ApiResult<Option<u64>> {
        let position = self
            .queue
            .enqueue(&self.event, first)
            .await
            .map_err(|e| store_api_error("ZADD merge_queue", e))?;
        Ok(Some(position))
    }

    async fn delete_branch(&self, branch: &str) -> ApiResult<()> {
        self.client
            .delete_branch(self.installation(), &self.event.repo_id(), branch)
            .await
    }

    async fn trigger_test_commit(&self) -> ApiResult<()> {
        self.client
            .trigger_test_merge_commit(self.installation(), &self.event.repo_id(), self.pr())
            .await
    }

    async fn pull_requests_for_ref(&self, ref_name: &str) -> ApiResult<Option<u64>> {
        // Open PRs based on the ref are dependents; deleting the branch
        // under them would close them.
        let prs = self
            .client
            .open_prs(self.installation(), &self.event.repo_id(), Some(ref_name), None)
            .await?;
        Ok(Some(prs.len() as u64))
    }
}

// ─── Controller ───────────────────────────────────────────────────────────────

/// Drives evaluations for webhook and merge workers.
pub struct Controller {
    client: Arc<GitHubClient>,
    store: Arc<dyn QueueStore>,
    /// The running GitHub App's id, matched against `config.app_id`.
    app_id: u64,
    /// The bot's login, for push allowances and self-approval detection.
    bot_login: String,
}

impl Controller {
    pub fn new(
        client: Arc<GitHubClient>,
        store: Arc<dyn QueueStore>,
        app_id: u64,
        bot_login: impl Into<String>,
    ) -> Self {
        Controller {
            client,
            store,
            app_id,
            bot_login: bot_login.into(),
        }
    }

    /// One passive evaluation, run by webhook workers. Eligible PRs end up
    /// in their merge queue via the engine's queueing rule.
    pub async fn run_passive(&self, event: &WebhookEvent) -> Result<(), ControllerError> {
        self.evaluate_with_retries(event, false, SKIPPABLE_CHECK_BUDGET)
            .await?;
        Ok(())
    }

    /// The merging-mode loop for one queue entry, run by merge workers.
    pub async fn run_merge(&self, event: &WebhookEvent) -> Result<MergeRun, ControllerError> {
        let mut skippable_budget = SKIPPABLE_CHECK_BUDGET;
        loop {
            let attempt = tokio::time::timeout(
                EVALUATION_TIMEOUT,
                self.evaluate_with_retries(event, true, skippable_budget),
            )
            .await;
            match attempt {
                Err(_elapsed) => {
                    // Do not wedge the worker on one slow PR.
                    info!(pr = %event.pr_number, "evaluation timed out, requeueing at the back");
                    let queue = MergeQueue::for_event(self.store.clone(), event);
                    queue.enqueue(event, false).await?;
                    return Ok(MergeRun::Requeued);
                }
                Ok(Ok(Evaluation::Done)) => return Ok(MergeRun::Completed),
                Ok(Ok(Evaluation::PollAgain)) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Ok(Ok(Evaluation::RetrySkippable)) => {
                    skippable_budget = skippable_budget.saturating_sub(1);
                    tokio::time::sleep(SKIPPABLE_RETRY_INTERVAL).await;
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Runs one evaluation, retrying transient API failures within the
    /// budget. When the budget runs out, a final evaluation with zero
    /// retries remaining makes the engine report the connectivity problem
    /// on the PR instead of failing silently.
    async fn evaluate_with_retries(
        &self,
        event: &WebhookEvent,
        merging: bool,
        skippable_budget: u32,
    ) -> Result<Evaluation, GitHubApiError> {
        let mut remaining = API_RETRY_BUDGET;
        let mut failed_method: Option<String> = None;
        loop {
            match self
                .evaluate_once(event, merging, skippable_budget, remaining, failed_method.as_deref())
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retriable() => {
                    warn!(pr = %event.pr_number, error = %e, "transient GitHub API failure");
                    failed_method = Some(e.method);
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        return self
                            .evaluate_once(event, merging, skippable_budget, 0, failed_method.as_deref())
                            .await;
                    }
                    tokio::time::sleep(API_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Assembles a fresh snapshot and runs the engine once.
    async fn evaluate_once(
        &self,
        event: &WebhookEvent,
        merging: bool,
        skippable_budget: u32,
        api_retries_remaining: u32,
        api_retry_method: Option<&str>,
    ) -> Result<Evaluation, GitHubApiError> {
        let repo = event.repo_id();
        let queue = MergeQueue::for_event(self.store.clone(), event);

        let snapshot = self
            .client
            .pr_snapshot(event.installation_id, &repo, event.pr_number)
            .await?;

        // No config file means the bot is not enabled for this repository.
        let Some(config_text) = snapshot.config_text else {
            queue
                .remove(event)
                .await
                .map_err(|e| store_api_error("ZREM merge_queue", e))?;
            return Ok(Evaluation::Done);
        };

        let subscription = self
            .store
            .hgetall(&keys::subscription_key(event.installation_id))
            .await
            .map(subscription_from_hash)
            .map_err(|e| store_api_error("HGETALL subscription", e))?;

        let is_active_merge = !merging
            && queue
                .is_active(event)
                .await
                .map_err(|e| store_api_error("GET merge_queue target", e))?;

        let input = EvalInput {
            config: ParsedConfig::parse(&config_text),
            pr: snapshot.pr.clone(),
            branch_protection: snapshot.branch_protection,
            reviews: snapshot.reviews,
            review_requests: snapshot.review_requests,
            status_contexts: snapshot.status_contexts,
            check_runs: snapshot.check_runs,
            commit_authors: snapshot.commit_authors,
            repository: snapshot.repository,
            valid_merge_methods: snapshot.valid_merge_methods,
            merging,
            is_active_merge,
            skippable_check_budget: skippable_budget,
            api_retries_remaining,
            api_retry_method: api_retry_method.map(str::to_string),
            subscription,
            app_id: self.app_id,
            bot_login: self.bot_login.clone(),
        };

        let api = LivePrApi {
            client: self.client.clone(),
            queue,
            event: event.clone(),
            sha: snapshot.pr.latest_sha,
        };
        evaluate(&input, &api).await
    }
}

/// Decodes the billing hash stored per installation. An absent hash means
/// no subscription record exists.
fn subscription_from_hash(fields: HashMap<String, String>) -> Option<Subscription> {
    if fields.is_empty() {
        return None;
    }
    let account_id = fields.get("account_id").cloned().unwrap_or_default();
    let blocker = fields
        .get("subscription_blocker")
        .filter(|kind| !kind.is_empty())
        .map(|kind| SubscriptionBlocker {
            kind: kind.clone(),
            allowed_user_logins: fields
                .get("allowed_user_logins")
                .map(|logins| {
                    logins
                        .split(',')
                        .filter(|login| !login.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        });
    Some(Subscription {
        account_id,
        blocker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_hash_is_no_subscription() {
        assert_eq!(subscription_from_hash(HashMap::new()), None);
    }

    #[test]
    fn unblocked_subscription_decodes() {
        let sub = subscription_from_hash(hash(&[("account_id", "acct_1")])).unwrap();
        assert_eq!(sub.account_id, "acct_1");
        assert_eq!(sub.blocker, None);
    }

    #[test]
    fn blocker_with_exempt_users_decodes() {
        let sub = subscription_from_hash(hash(&[
            ("account_id", "acct_1"),
            ("subscription_blocker", "seats_exceeded"),
            ("allowed_user_logins", "alice,bob"),
        ]))
        .unwrap();
        let blocker = sub.blocker.unwrap();
        assert_eq!(blocker.kind, "seats_exceeded");
        assert_eq!(blocker.allowed_user_logins, vec!["alice", "bob"]);
    }

    #[test]
    fn empty_blocker_field_means_unblocked() {
        let sub = subscription_from_hash(hash(&[
            ("account_id", "acct_1"),
            ("subscription_blocker", ""),
        ]))
        .unwrap();
        assert_eq!(sub.blocker, None);
    }
}
