//! The mergeability decision procedure.
//!
//! [`evaluate`] is a pure decision function over a freshly fetched snapshot
//! of one pull request. It acts only through the [`PrApi`] capability trait
//! and returns an [`Evaluation`] telling the calling worker what to do next.
//! The rule order below is a correctness contract: earlier rules
//! short-circuit later ones, so e.g. a config error is reported before any
//! label or review logic runs.

use regex::Regex;
use tracing::warn;

use super::api::{ApiResult, PrApi};
use super::checks::{classify_checks, failing_required, missing_required};
use super::messages::{conflict_comment, merge_failure_comment, merge_message, ordinal};
use super::reviews::{approval_count, changes_requested_by, latest_actionable_reviews};
use crate::config::ParsedConfig;
use crate::types::{
    BranchProtectionRule, CheckRun, CommitAuthor, MergeMethod, MergeStateStatus, MergeableState,
    PullRequestFacts, PullRequestState, RepositoryFlags, Review, ReviewRequest, ReviewState,
    StatusContext, Subscription,
};

/// What the worker loop should do after one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Terminal for this cycle; a fresh webhook re-enters the PR.
    Done,
    /// The PR is progressing (branch updating, checks running); re-evaluate
    /// after a short poll interval, unbounded.
    PollAgain,
    /// Only configured-skippable checks are incomplete; re-evaluate after a
    /// short interval, decrementing the bounded skippable-check budget.
    RetrySkippable,
}

/// Everything one evaluation reads. Assembled fresh per evaluation; nothing
/// here is cached between cycles.
#[derive(Debug, Clone)]
pub struct EvalInput {
    pub config: ParsedConfig,
    pub pr: PullRequestFacts,
    pub branch_protection: Option<BranchProtectionRule>,
    /// All reviews, in submission order.
    pub reviews: Vec<Review>,
    pub review_requests: Vec<ReviewRequest>,
    pub status_contexts: Vec<StatusContext>,
    pub check_runs: Vec<CheckRun>,
    pub commit_authors: Vec<CommitAuthor>,
    pub repository: RepositoryFlags,
    pub valid_merge_methods: Vec<MergeMethod>,
    /// True when a merge worker owns this evaluation.
    pub merging: bool,
    /// True when a merge worker owns this PR but *this* evaluation is a
    /// passive one; suppresses the queue-position status write.
    pub is_active_merge: bool,
    /// Remaining retries for configured-skippable incomplete checks.
    pub skippable_check_budget: u32,
    /// Remaining transient-API retries. Zero means the budget is exhausted
    /// and the evaluation must report connectivity trouble instead.
    pub api_retries_remaining: u32,
    /// The API method whose failures exhausted the budget, if known.
    pub api_retry_method: Option<String>,
    pub subscription: Option<Subscription>,
    /// The running GitHub App's id, checked against `config.app_id`.
    pub app_id: u64,
    /// The bot's login, for push allowances and self-approval detection.
    pub bot_login: String,
}

/// Reports a blocking condition and removes the PR from the merge queue.
async fn block(api: &dyn PrApi, reason: &str) -> ApiResult<Evaluation> {
    api.set_status(&format!("cannot merge ({reason})"), None)
        .await?;
    api.dequeue().await?;
    Ok(Evaluation::Done)
}

/// Reports a configuration problem. Terminal for the cycle; a fresh webhook
/// (e.g. a config push) re-enters the PR.
async fn config_error(
    api: &dyn PrApi,
    reason: &str,
    detail: Option<&str>,
) -> ApiResult<Evaluation> {
    api.set_status(&format!("config error ({reason})"), detail)
        .await?;
    api.dequeue().await?;
    Ok(Evaluation::Done)
}

fn list_contexts<'a>(contexts: impl IntoIterator<Item = &'a String>) -> String {
    contexts
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs the full ordered decision list for one pull request.
pub async fn evaluate(input: &EvalInput, api: &dyn PrApi) -> ApiResult<Evaluation> {
    let pr = &input.pr;

    // Invalid config: report and stand down until the config changes.
    let config = match &input.config {
        ParsedConfig::Valid(config) => config,
        ParsedConfig::SchemaError(detail) => {
            return config_error(api, "invalid configuration schema", Some(detail)).await;
        }
        ParsedConfig::ParseError(detail) => {
            return config_error(api, "configuration is not valid TOML", Some(detail)).await;
        }
    };

    // API retry budget already spent: report connectivity trouble. No
    // dequeue, so a future webhook retries.
    if input.api_retries_remaining == 0 {
        let summary = match &input.api_retry_method {
            Some(method) => format!("problem contacting GitHub API with method {method:?}"),
            None => "problem contacting GitHub API".to_string(),
        };
        api.set_status(&summary, None).await?;
        return Ok(Evaluation::Done);
    }

    // Multi-instance guard: another bot instance owns this repository.
    if let Some(configured) = &config.app_id
        && *configured != input.app_id.to_string()
    {
        api.dequeue().await?;
        return Ok(Evaluation::Done);
    }

    let Some(protection) = &input.branch_protection else {
        return config_error(
            api,
            &format!(
                "missing branch protection for base branch {:?}",
                pr.base_ref_name
            ),
            None,
        )
        .await;
    };

    // GitHub cannot rebase-merge onto a branch requiring signed commits.
    if protection.requires_commit_signatures && config.merge.method == MergeMethod::Rebase {
        return config_error(
            api,
            "merge.method \"rebase\" is incompatible with required commit signatures",
            None,
        )
        .await;
    }

    if !input.valid_merge_methods.contains(&config.merge.method) {
        let valid = input
            .valid_merge_methods
            .iter()
            .map(|m| m.as_api_str())
            .collect::<Vec<_>>()
            .join(", ");
        return config_error(
            api,
            &format!(
                "merge.method {:?} is not enabled for this repository (valid: {valid})",
                config.merge.method.as_api_str()
            ),
            None,
        )
        .await;
    }

    if protection.restricts_pushes
        && !protection.push_allowances.contains(&input.bot_login)
        && !config.merge.do_not_merge
    {
        return config_error(
            api,
            &format!(
                "the bot cannot push to {:?}; add it to the branch's push allowances",
                pr.base_ref_name
            ),
            None,
        )
        .await;
    }

    if pr.labels.contains(&config.disable_bot_label) {
        api.set_status(
            &format!("automerge disabled by the {:?} label", config.disable_bot_label),
            None,
        )
        .await?;
        api.dequeue().await?;
        return Ok(Evaluation::Done);
    }

    // Billing gate, private repositories only. No dequeue: fixing the
    // subscription plus any webhook resumes the PR.
    if input.repository.is_private
        && let Some(subscription) = &input.subscription
        && let Some(blocker) = &subscription.blocker
        && !blocker.allowed_user_logins.contains(&pr.author)
    {
        api.set_status(
            &format!("cannot merge (subscription blocker: {})", blocker.kind),
            None,
        )
        .await?;
        return Ok(Evaluation::Done);
    }

    // Auto-approval for trusted authors (dependency-update bots). A side
    // effect only; evaluation continues.
    if config.approve.auto_approve_usernames.contains(&pr.author)
        && pr.state == PullRequestState::Open
        && !pr.is_draft
    {
        let already_approved = input
            .reviews
            .iter()
            .any(|r| r.author == input.bot_login && r.state == ReviewState::Approved);
        if !already_approved {
            api.approve_pr().await?;
        }
    }

    let has_automerge_label = pr.labels.contains(&config.merge.automerge_label);
    let behind = protection.requires_strict_status_checks
        && pr.merge_state_status == MergeStateStatus::Behind;

    // update.always: keep branches fresh even outside the merge path.
    if behind
        && !input.merging
        && config.update.always
        && (!config.update.require_automerge_label || has_automerge_label)
        && !config.update.blacklist_usernames.contains(&pr.author)
    {
        api.set_status("updating branch", None).await?;
        api.update_branch().await?;
        return Ok(Evaluation::Done);
    }

    if config.merge.require_automerge_label && !has_automerge_label {
        return block(
            api,
            &format!("missing automerge label {:?}", config.merge.automerge_label),
        )
        .await;
    }

    if (pr.merge_state_status == MergeStateStatus::Dirty
        || pr.mergeable == MergeableState::Conflicting)
        && pr.state == PullRequestState::Open
    {
        api.set_status("cannot merge (merge conflict)", None).await?;
        api.dequeue().await?;
        if config.merge.notify_on_conflict && config.merge.require_automerge_label {
            api.remove_label(&config.merge.automerge_label).await?;
            api.create_comment(&conflict_comment(&config.merge.automerge_label))
                .await?;
        }
        return Ok(Evaluation::Done);
    }

    let blacklisted: Vec<&String> = pr
        .labels
        .iter()
        .filter(|label| config.merge.blacklist_labels.contains(label))
        .collect();
    if !blacklisted.is_empty() {
        return block(
            api,
            &format!("has blacklist labels: {}", list_contexts(blacklisted)),
        )
        .await;
    }

    // The pattern is user-supplied; the linear-time regex engine keeps a
    // pathological pattern from stalling the worker.
    if !config.merge.blacklist_title_regex.is_empty() {
        match Regex::new(&config.merge.blacklist_title_regex) {
            Ok(pattern) => {
                if pattern.is_match(&pr.title) {
                    return block(api, "title matches merge.blacklist_title_regex").await;
                }
            }
            Err(e) => {
                return config_error(
                    api,
                    "invalid merge.blacklist_title_regex",
                    Some(&e.to_string()),
                )
                .await;
            }
        }
    }

    if pr.is_draft {
        return block(api, "pull request is in draft state").await;
    }

    if config.merge.block_on_reviews_requested && !input.review_requests.is_empty() {
        let reviewers: Vec<String> = input
            .review_requests
            .iter()
            .map(|r| r.name.clone())
            .collect();
        return block(
            api,
            &format!(
                "review requested and merge.block_on_reviews_requested is enabled: {}",
                list_contexts(&reviewers)
            ),
        )
        .await;
    }

    if pr.state == PullRequestState::Merged {
        api.dequeue().await?;
        // Head branch cleanup, only when nothing else depends on the ref
        // and GitHub's own auto-delete is not already responsible.
        if config.merge.delete_branch_on_merge
            && !pr.is_cross_repository
            && !input.repository.delete_branch_on_merge
            && api.pull_requests_for_ref(&pr.head_ref_name).await? == Some(0)
        {
            api.delete_branch(&pr.head_ref_name).await?;
        }
        return Ok(Evaluation::Done);
    }

    if pr.state == PullRequestState::Closed {
        api.dequeue().await?;
        return Ok(Evaluation::Done);
    }

    // GitHub has not finished computing mergeability. Nudge it into
    // creating the test merge commit and come back.
    if pr.mergeable == MergeableState::Unknown {
        api.trigger_test_commit().await?;
        api.requeue().await?;
        return Ok(if input.merging {
            Evaluation::PollAgain
        } else {
            Evaluation::Done
        });
    }

    let mut wait_for_checks = false;
    let mut need_update = false;

    if matches!(
        pr.merge_state_status,
        MergeStateStatus::Blocked | MergeStateStatus::Behind
    ) {
        // Reviews.
        let folded = latest_actionable_reviews(&input.reviews);
        let requesting_changes = changes_requested_by(&folded);
        if !requesting_changes.is_empty() {
            return block(
                api,
                &format!("changes requested by {}", requesting_changes.join(", ")),
            )
            .await;
        }
        if protection.requires_approving_reviews {
            let required = protection.required_approving_review_count.unwrap_or(0);
            let approvals = approval_count(&folded);
            if approvals < required {
                // No dequeue: the next review submission re-triggers us.
                api.set_status(
                    &format!("cannot merge (missing required reviews, have {approvals}/{required})"),
                    None,
                )
                .await?;
                return Ok(Evaluation::Done);
            }
        }

        // Status checks.
        let classified = classify_checks(
            &input.status_contexts,
            &input.check_runs,
            &config.merge.dont_wait_on_status_checks,
        );
        let failing = failing_required(
            &classified.failing,
            &protection.required_status_check_contexts,
        );
        if !failing.is_empty() {
            return block(
                api,
                &format!("failing required status checks: {}", list_contexts(&failing)),
            )
            .await;
        }
        if !classified.skippable.is_empty() {
            if input.merging {
                if input.skippable_check_budget > 0 {
                    return Ok(Evaluation::RetrySkippable);
                }
                api.set_status(
                    &format!(
                        "cannot merge (timed out waiting on status checks: {})",
                        list_contexts(&classified.skippable)
                    ),
                    None,
                )
                .await?;
                return Ok(Evaluation::Done);
            }
            api.set_status(
                &format!(
                    "not waiting on configured skippable status checks: {}",
                    list_contexts(&classified.skippable)
                ),
                None,
            )
            .await?;
            return Ok(Evaluation::Done);
        }

        let missing = missing_required(
            &protection.required_status_check_contexts,
            &classified.passing,
            &config.merge.dont_wait_on_status_checks,
        );
        wait_for_checks = protection.requires_status_checks && !missing.is_empty();
        need_update = behind;

        if config.merge.update_branch_immediately && need_update {
            api.set_status("updating branch", None).await?;
            api.update_branch().await?;
            return Ok(if input.merging {
                Evaluation::PollAgain
            } else {
                Evaluation::Done
            });
        }

        if input.merging && (need_update || wait_for_checks) {
            let update_now = if config.merge.optimistic_updates {
                need_update
            } else {
                need_update && !wait_for_checks
            };
            if update_now {
                api.set_status("updating branch", None).await?;
                api.update_branch().await?;
            } else {
                api.set_status(
                    &format!(
                        "merging PR (waiting for status checks: {})",
                        list_contexts(&missing)
                    ),
                    None,
                )
                .await?;
            }
            return Ok(Evaluation::PollAgain);
        }

        // Blocked per GitHub, yet nothing we can identify to wait on or
        // update. Should not happen; report rather than guess.
        if !wait_for_checks && !need_update {
            warn!(
                pr = pr.number,
                merge_state = ?pr.merge_state_status,
                "PR blocked with no identifiable blocker"
            );
            return block(api, "blocked by GitHub requirements").await;
        }
    }

    let ready_to_merge = !(wait_for_checks || need_update);

    if config.merge.do_not_merge {
        let summary = if wait_for_checks {
            "merge.do_not_merge is enabled (waiting for status checks)"
        } else if need_update {
            "merge.do_not_merge is enabled (branch is out of date; update it or set update.always)"
        } else {
            "merge.do_not_merge is enabled (PR would have merged)"
        };
        api.set_status(summary, None).await?;
        return Ok(Evaluation::Done);
    }

    if (config.merge.prioritize_ready_to_merge && ready_to_merge) || input.merging {
        api.set_status("attempting to merge PR", None).await?;
        let (title, body) = merge_message(&config.merge.message, pr, &input.commit_authors);
        return match api
            .merge(config.merge.method, title.as_deref(), body.as_deref())
            .await
        {
            Ok(()) => Ok(Evaluation::Done),
            // A 500 from the merge endpoint can mean the merge half-applied;
            // retrying risks duplicate merges, so the bot disables itself on
            // this PR instead.
            Err(e) if e.is_internal_server_error() => {
                api.add_label(&config.disable_bot_label).await?;
                api.set_status(
                    &format!(
                        "cannot merge (merge failure; automerge disabled via the {:?} label)",
                        config.disable_bot_label
                    ),
                    None,
                )
                .await?;
                api.create_comment(&merge_failure_comment(&config.disable_bot_label))
                    .await?;
                api.dequeue().await?;
                Ok(Evaluation::Done)
            }
            Err(e) => Err(e),
        };
    }

    let position = api.queue_for_merge(false).await?;
    if !input.is_active_merge {
        match position {
            Some(position) => {
                api.set_status(
                    &format!("enqueued for merge (position={})", ordinal(position)),
                    None,
                )
                .await?;
            }
            None => warn!(pr = pr.number, "queued entry missing when reading position"),
        }
    }
    Ok(Evaluation::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::api::{ApiCall, RecordingApi};
    use crate::github::GitHubApiError;
    use crate::types::{Permission, Sha};

    fn config(text: &str) -> ParsedConfig {
        let parsed = ParsedConfig::parse(text);
        assert!(
            matches!(parsed, ParsedConfig::Valid(_)),
            "test config must be valid: {parsed:?}"
        );
        parsed
    }

    fn pr() -> PullRequestFacts {
        PullRequestFacts {
            id: "PR_1".to_string(),
            number: 42,
            author: "alice".to_string(),
            labels: vec!["automerge".to_string()],
            title: "Add widget support".to_string(),
            body: String::new(),
            body_text: String::new(),
            body_html: String::new(),
            merge_state_status: MergeStateStatus::Clean,
            mergeable: MergeableState::Mergeable,
            is_cross_repository: false,
            base_ref_name: "main".to_string(),
            head_ref_name: "widgets".to_string(),
            latest_sha: Sha::new("0123abc"),
            state: PullRequestState::Open,
            is_draft: false,
        }
    }

    fn input() -> EvalInput {
        EvalInput {
            config: config("version = 1"),
            pr: pr(),
            branch_protection: Some(BranchProtectionRule::default()),
            reviews: vec![],
            review_requests: vec![],
            status_contexts: vec![],
            check_runs: vec![],
            commit_authors: vec![],
            repository: RepositoryFlags::default(),
            valid_merge_methods: vec![MergeMethod::Merge, MergeMethod::Squash, MergeMethod::Rebase],
            merging: false,
            is_active_merge: false,
            skippable_check_budget: 4,
            api_retries_remaining: 5,
            api_retry_method: None,
            subscription: None,
            app_id: 123,
            bot_login: "automerge-bot".to_string(),
        }
    }

    fn review(author: &str, state: ReviewState) -> Review {
        Review {
            author: author.to_string(),
            state,
            author_permission: Permission::Write,
        }
    }

    async fn run(input: &EvalInput, api: &RecordingApi) -> Evaluation {
        evaluate(input, api).await.expect("evaluation failed")
    }

    fn dequeued(api: &RecordingApi) -> bool {
        api.calls().contains(&ApiCall::Dequeue)
    }

    // ─── Terminal PR states ───────────────────────────────────────────────

    #[tokio::test]
    async fn merged_pr_dequeues_and_never_merges() {
        let mut input = input();
        input.pr.state = PullRequestState::Merged;
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert!(dequeued(&api));
        for call in api.calls() {
            assert!(
                !matches!(
                    call,
                    ApiCall::Merge { .. }
                        | ApiCall::UpdateBranch
                        | ApiCall::QueueForMerge { .. }
                ),
                "unexpected call on merged PR: {call:?}"
            );
        }
    }

    #[tokio::test]
    async fn merged_pr_deletes_branch_only_without_dependents() {
        let mut input = input();
        input.pr.state = PullRequestState::Merged;
        input.config = config("version = 1\n[merge]\ndelete_branch_on_merge = true");

        let api = RecordingApi::new();
        api.set_open_prs_for_ref(Some(0));
        run(&input, &api).await;
        assert!(api.calls().contains(&ApiCall::DeleteBranch("widgets".to_string())));

        // A stacked PR still targets the branch: leave it alone.
        let api = RecordingApi::new();
        api.set_open_prs_for_ref(Some(1));
        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::DeleteBranch(_))), 0);
    }

    #[tokio::test]
    async fn merged_cross_repo_pr_keeps_its_branch() {
        let mut input = input();
        input.pr.state = PullRequestState::Merged;
        input.pr.is_cross_repository = true;
        input.config = config("version = 1\n[merge]\ndelete_branch_on_merge = true");

        let api = RecordingApi::new();
        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::DeleteBranch(_))), 0);
    }

    #[tokio::test]
    async fn closed_pr_dequeues() {
        let mut input = input();
        input.pr.state = PullRequestState::Closed;
        let api = RecordingApi::new();
        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert!(dequeued(&api));
    }

    // ─── Indeterminate mergeability ───────────────────────────────────────

    #[tokio::test]
    async fn unknown_mergeability_while_merging_polls() {
        let mut input = input();
        input.pr.mergeable = MergeableState::Unknown;
        input.merging = true;
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::PollAgain);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::TriggerTestCommit)), 1);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Requeue)), 1);
    }

    #[tokio::test]
    async fn unknown_mergeability_passive_requeues_and_stops() {
        let mut input = input();
        input.pr.mergeable = MergeableState::Unknown;
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::TriggerTestCommit)), 1);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Requeue)), 1);
    }

    // ─── Config gates ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_toml_reports_config_error() {
        let mut input = input();
        input.config = ParsedConfig::parse("version = ");
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("config error"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn exhausted_api_budget_reports_connectivity() {
        let mut input = input();
        input.api_retries_remaining = 0;
        input.api_retry_method = Some("GET pulls/42".to_string());
        let api = RecordingApi::new();

        run(&input, &api).await;
        let statuses = api.statuses();
        assert!(statuses[0].contains("problem contacting GitHub API"));
        assert!(statuses[0].contains("GET pulls/42"));
        assert!(!dequeued(&api));
    }

    #[tokio::test]
    async fn app_id_mismatch_dequeues_silently() {
        let mut input = input();
        input.config = config("version = 1\napp_id = \"999\"");
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert_eq!(api.calls(), vec![ApiCall::Dequeue]);
    }

    #[tokio::test]
    async fn missing_branch_protection_is_config_error() {
        let mut input = input();
        input.branch_protection = None;
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("missing branch protection"));
    }

    #[tokio::test]
    async fn rebase_with_required_signatures_is_config_error() {
        let mut input = input();
        input.config = config("version = 1\n[merge]\nmethod = \"rebase\"");
        input.branch_protection = Some(BranchProtectionRule {
            requires_commit_signatures: true,
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("commit signatures"));
    }

    #[tokio::test]
    async fn disabled_merge_method_is_config_error() {
        let mut input = input();
        input.config = config("version = 1\n[merge]\nmethod = \"squash\"");
        input.valid_merge_methods = vec![MergeMethod::Merge];
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("valid: merge"));
    }

    #[tokio::test]
    async fn push_restriction_without_allowance_is_config_error() {
        let mut input = input();
        input.branch_protection = Some(BranchProtectionRule {
            restricts_pushes: true,
            push_allowances: vec!["someone-else".to_string()],
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("push allowances"));
    }

    // ─── Label and state gates ────────────────────────────────────────────

    #[tokio::test]
    async fn disable_label_turns_the_bot_off() {
        let mut input = input();
        input.pr.labels.push("automerge-disabled".to_string());
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("automerge disabled"));
        assert!(dequeued(&api));
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 0);
    }

    #[tokio::test]
    async fn missing_automerge_label_blocks() {
        let mut input = input();
        input.pr.labels.clear();
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("missing automerge label"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn draft_pr_blocks() {
        let mut input = input();
        input.pr.is_draft = true;
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("draft"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn conflict_removes_label_and_comments() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Dirty;
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("merge conflict"));
        assert!(dequeued(&api));
        assert!(api
            .calls()
            .contains(&ApiCall::RemoveLabel("automerge".to_string())));
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::CreateComment(_))), 1);
    }

    #[tokio::test]
    async fn conflict_notification_can_be_disabled() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Dirty;
        input.config = config("version = 1\n[merge]\nnotify_on_conflict = false");
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(dequeued(&api));
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::RemoveLabel(_))), 0);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::CreateComment(_))), 0);
    }

    #[tokio::test]
    async fn blacklist_label_blocks() {
        let mut input = input();
        input.pr.labels.push("wip".to_string());
        input.config = config("version = 1\n[merge]\nblacklist_labels = [\"wip\"]");
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("blacklist labels"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn pathological_blacklist_pattern_still_terminates() {
        let mut input = input();
        // Catastrophic for a backtracking engine; linear here.
        input.config =
            config("version = 1\n[merge]\nblacklist_title_regex = \"(a+)+$\"");
        input.pr.title = "a".repeat(5000);
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("blacklist_title_regex"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn review_requests_block_when_configured() {
        let mut input = input();
        input.config = config("version = 1\n[merge]\nblock_on_reviews_requested = true");
        input.review_requests = vec![ReviewRequest {
            name: "bob".to_string(),
        }];
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("block_on_reviews_requested"));
        assert!(dequeued(&api));
    }

    // ─── Billing and approvals ────────────────────────────────────────────

    #[tokio::test]
    async fn subscription_blocker_gates_private_repos() {
        use crate::types::SubscriptionBlocker;

        let mut input = input();
        input.repository.is_private = true;
        input.subscription = Some(Subscription {
            account_id: "acct_1".to_string(),
            blocker: Some(SubscriptionBlocker {
                kind: "seats_exceeded".to_string(),
                allowed_user_logins: vec!["licensed-user".to_string()],
            }),
        });
        let api = RecordingApi::new();
        run(&input, &api).await;
        assert!(api.statuses()[0].contains("seats_exceeded"));
        assert!(!dequeued(&api));

        // Public repositories are never gated.
        input.repository.is_private = false;
        let api = RecordingApi::new();
        run(&input, &api).await;
        assert!(!api.statuses().iter().any(|s| s.contains("seats_exceeded")));

        // An exempt author passes through.
        input.repository.is_private = true;
        input.pr.author = "licensed-user".to_string();
        let api = RecordingApi::new();
        run(&input, &api).await;
        assert!(!api.statuses().iter().any(|s| s.contains("seats_exceeded")));
    }

    #[tokio::test]
    async fn trusted_author_is_auto_approved_once() {
        let mut input = input();
        input.pr.author = "dependabot".to_string();
        input.config =
            config("version = 1\n[approve]\nauto_approve_usernames = [\"dependabot\"]");

        let api = RecordingApi::new();
        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::ApprovePr)), 1);

        // An existing bot approval is not repeated.
        input.reviews = vec![review("automerge-bot", ReviewState::Approved)];
        let api = RecordingApi::new();
        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::ApprovePr)), 0);
    }

    // ─── Reviews and checks under branch protection ───────────────────────

    #[tokio::test]
    async fn missing_reviews_report_without_dequeue() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        input.branch_protection = Some(BranchProtectionRule {
            requires_approving_reviews: true,
            required_approving_review_count: Some(2),
            ..BranchProtectionRule::default()
        });
        input.reviews = vec![review("bob", ReviewState::Approved)];
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("missing required reviews, have 1/2"));
        assert!(!dequeued(&api));
    }

    #[tokio::test]
    async fn changes_requested_blocks() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        input.reviews = vec![
            review("bob", ReviewState::Approved),
            review("carol", ReviewState::ChangesRequested),
        ];
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("changes requested by carol"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn travis_pr_suffix_failure_blocks_bare_requirement() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        input.branch_protection = Some(BranchProtectionRule {
            requires_status_checks: true,
            required_status_check_contexts: vec![
                "continuous-integration/travis-ci".to_string(),
            ],
            ..BranchProtectionRule::default()
        });
        input.status_contexts = vec![StatusContext {
            context: "continuous-integration/travis-ci/pr".to_string(),
            state: crate::types::StatusState::Failure,
        }];
        let api = RecordingApi::new();

        run(&input, &api).await;
        let statuses = api.statuses();
        assert!(statuses[0].contains("failing required status checks"));
        assert!(statuses[0].contains("continuous-integration/travis-ci/pr"));
        assert!(dequeued(&api));
    }

    #[tokio::test]
    async fn skippable_checks_poll_then_time_out_while_merging() {
        let mut input = input();
        input.merging = true;
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        input.config =
            config("version = 1\n[merge]\ndont_wait_on_status_checks = [\"ci/flaky\"]");
        input.branch_protection = Some(BranchProtectionRule {
            requires_status_checks: true,
            required_status_check_contexts: vec!["ci/flaky".to_string()],
            ..BranchProtectionRule::default()
        });
        input.status_contexts = vec![StatusContext {
            context: "ci/flaky".to_string(),
            state: crate::types::StatusState::Pending,
        }];

        let api = RecordingApi::new();
        assert_eq!(run(&input, &api).await, Evaluation::RetrySkippable);
        assert!(api.calls().is_empty());

        input.skippable_check_budget = 0;
        let api = RecordingApi::new();
        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert!(api.statuses()[0].contains("timed out waiting on status checks"));
    }

    #[tokio::test]
    async fn merging_waits_for_required_checks() {
        let mut input = input();
        input.merging = true;
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        input.branch_protection = Some(BranchProtectionRule {
            requires_status_checks: true,
            required_status_check_contexts: vec!["ci/build".to_string()],
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::PollAgain);
        assert!(api.statuses()[0].contains("waiting for status checks"));
        assert!(api.statuses()[0].contains("ci/build"));
    }

    #[tokio::test]
    async fn behind_branch_is_updated_while_merging() {
        let mut input = input();
        input.merging = true;
        input.pr.merge_state_status = MergeStateStatus::Behind;
        input.branch_protection = Some(BranchProtectionRule {
            requires_strict_status_checks: true,
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::PollAgain);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::UpdateBranch)), 1);
    }

    #[tokio::test]
    async fn pessimistic_updates_wait_for_checks_before_updating() {
        let mut input = input();
        input.merging = true;
        input.config = config("version = 1\n[merge]\noptimistic_updates = false");
        input.pr.merge_state_status = MergeStateStatus::Behind;
        input.branch_protection = Some(BranchProtectionRule {
            requires_status_checks: true,
            requires_strict_status_checks: true,
            required_status_check_contexts: vec!["ci/build".to_string()],
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::PollAgain);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::UpdateBranch)), 0);
        assert!(api.statuses()[0].contains("waiting for status checks"));
    }

    #[tokio::test]
    async fn update_always_refreshes_stale_branches_passively() {
        let mut input = input();
        input.config = config("version = 1\n[update]\nalways = true");
        input.pr.merge_state_status = MergeStateStatus::Behind;
        input.branch_protection = Some(BranchProtectionRule {
            requires_strict_status_checks: true,
            ..BranchProtectionRule::default()
        });
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::UpdateBranch)), 1);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::QueueForMerge { .. })), 0);
    }

    #[tokio::test]
    async fn blocked_with_no_identifiable_blocker_is_reported() {
        let mut input = input();
        input.pr.merge_state_status = MergeStateStatus::Blocked;
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert!(api.statuses()[0].contains("blocked by GitHub requirements"));
        assert!(dequeued(&api));
    }

    // ─── Merging and queueing ─────────────────────────────────────────────

    #[tokio::test]
    async fn do_not_merge_never_merges() {
        let mut input = input();
        input.merging = true;
        input.config = config("version = 1\n[merge]\ndo_not_merge = true");
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 0);
        assert!(api.statuses()[0].contains("do_not_merge"));
    }

    #[tokio::test]
    async fn clean_pr_merges_while_merging() {
        let mut input = input();
        input.merging = true;
        let api = RecordingApi::new();

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 1);
    }

    #[tokio::test]
    async fn merge_500_disables_the_bot_without_retrying() {
        let mut input = input();
        input.merging = true;
        let api = RecordingApi::new();
        api.fail_next_merge(GitHubApiError::from_response(
            "PUT pulls/42/merge",
            500,
            "internal error",
        ));

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 1);
        assert!(api
            .calls()
            .contains(&ApiCall::AddLabel("automerge-disabled".to_string())));
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::CreateComment(_))), 1);
        assert!(dequeued(&api));

        // The next evaluation sees the disable label and stands down.
        input.pr.labels.push("automerge-disabled".to_string());
        let api = RecordingApi::new();
        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 0);
    }

    #[tokio::test]
    async fn merge_502_retries_instead_of_disabling() {
        let mut input = input();
        input.merging = true;
        let api = RecordingApi::new();
        api.fail_next_merge(GitHubApiError::from_response(
            "PUT pulls/42/merge",
            502,
            "bad gateway",
        ));

        let err = evaluate(&input, &api).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::AddLabel(_))), 0);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::CreateComment(_))), 0);
        assert!(!dequeued(&api));
    }

    #[tokio::test]
    async fn transient_merge_errors_propagate() {
        let mut input = input();
        input.merging = true;
        let api = RecordingApi::new();
        api.fail_next_merge(GitHubApiError::from_response(
            "PUT pulls/42/merge",
            429,
            "rate limited",
        ));

        let err = evaluate(&input, &api).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::AddLabel(_))), 0);
    }

    #[tokio::test]
    async fn prioritized_ready_pr_merges_inline() {
        let mut input = input();
        input.config = config("version = 1\n[merge]\nprioritize_ready_to_merge = true");
        let api = RecordingApi::new();

        run(&input, &api).await;
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::Merge { .. })), 1);
        assert_eq!(api.call_count(|c| matches!(c, ApiCall::QueueForMerge { .. })), 0);
    }

    #[tokio::test]
    async fn eligible_pr_is_queued_with_ordinal_position() {
        let input = input();
        let api = RecordingApi::new();
        api.set_queue_position(Some(4));

        assert_eq!(run(&input, &api).await, Evaluation::Done);
        assert!(api.calls().contains(&ApiCall::QueueForMerge { first: false }));
        assert!(api.statuses()[0].contains("position=4th"));
    }

    #[tokio::test]
    async fn active_merge_suppresses_position_status() {
        let mut input = input();
        input.is_active_merge = true;
        let api = RecordingApi::new();
        api.set_queue_position(Some(1));

        run(&input, &api).await;
        assert!(api.calls().contains(&ApiCall::QueueForMerge { first: false }));
        assert!(api.statuses().is_empty());
    }
}
