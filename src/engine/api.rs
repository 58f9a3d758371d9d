//! The capability surface the evaluation engine acts through.
//!
//! [`PrApi`] is the narrow set of actions an evaluation may take against a
//! pull request and its queue. The engine never talks to GitHub or the store
//! directly, which is what makes the full decision list testable without
//! network I/O: production binds the trait to the live client and merge
//! queue, tests bind it to [`RecordingApi`].

use std::sync::Mutex;

use async_trait::async_trait;

use crate::github::GitHubApiError;
use crate::types::MergeMethod;

pub type ApiResult<T> = Result<T, GitHubApiError>;

/// Actions available to one evaluation of one pull request.
#[async_trait]
pub trait PrApi: Send + Sync {
    /// Removes the PR from its merge queue.
    async fn dequeue(&self) -> ApiResult<()>;

    /// Pushes the PR to the back of its merge queue.
    async fn requeue(&self) -> ApiResult<()>;

    /// Reports progress on the PR's latest commit. `detail` is an optional
    /// markdown elaboration.
    async fn set_status(&self, summary: &str, detail: Option<&str>) -> ApiResult<()>;

    async fn merge(
        &self,
        method: MergeMethod,
        title: Option<&str>,
        body: Option<&str>,
    ) -> ApiResult<()>;

    async fn update_branch(&self) -> ApiResult<()>;

    async fn approve_pr(&self) -> ApiResult<()>;

    async fn add_label(&self, label: &str) -> ApiResult<()>;

    async fn remove_label(&self, label: &str) -> ApiResult<()>;

    async fn create_comment(&self, body: &str) -> ApiResult<()>;

    /// Enqueues the PR for merge, returning its 1-based queue position.
    /// `None` means the entry vanished between insert and read, which is
    /// logged upstream rather than treated as fatal.
    async fn queue_for_merge(&self, first: bool) -> ApiResult<Option<u64>>;

    async fn delete_branch(&self, branch: &str) -> ApiResult<()>;

    /// Issues the API call that makes GitHub recompute the PR's test merge
    /// commit, used when mergeability is still UNKNOWN.
    async fn trigger_test_commit(&self) -> ApiResult<()>;

    /// The number of open PRs whose base is `ref_name`, or `None` if the
    /// count could not be determined.
    async fn pull_requests_for_ref(&self, ref_name: &str) -> ApiResult<Option<u64>>;
}

// ─── Recording fake ───────────────────────────────────────────────────────────

/// One recorded [`PrApi`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Dequeue,
    Requeue,
    SetStatus {
        summary: String,
        detail: Option<String>,
    },
    Merge {
        method: MergeMethod,
        title: Option<String>,
        body: Option<String>,
    },
    UpdateBranch,
    ApprovePr,
    AddLabel(String),
    RemoveLabel(String),
    CreateComment(String),
    QueueForMerge {
        first: bool,
    },
    DeleteBranch(String),
    TriggerTestCommit,
    PullRequestsForRef(String),
}

/// In-memory [`PrApi`] that records the call sequence, for engine tests.
#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    queue_position: Mutex<Option<u64>>,
    open_prs_for_ref: Mutex<Option<u64>>,
    merge_error: Mutex<Option<GitHubApiError>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        RecordingApi::default()
    }

    /// The calls made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("recording mutex poisoned").clone()
    }

    /// The position `queue_for_merge` will report.
    pub fn set_queue_position(&self, position: Option<u64>) {
        *self.queue_position.lock().expect("recording mutex poisoned") = position;
    }

    /// The count `pull_requests_for_ref` will report.
    pub fn set_open_prs_for_ref(&self, count: Option<u64>) {
        *self
            .open_prs_for_ref
            .lock()
            .expect("recording mutex poisoned") = count;
    }

    /// Makes the next `merge` call fail with `error`.
    pub fn fail_next_merge(&self, error: GitHubApiError) {
        *self.merge_error.lock().expect("recording mutex poisoned") = Some(error);
    }

    /// The summaries of every recorded `set_status` call, in order.
    pub fn statuses(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::SetStatus { summary, .. } => Some(summary),
                _ => None,
            })
            .collect()
    }

    pub fn call_count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().expect("recording mutex poisoned").push(call);
    }
}

#[async_trait]
impl PrApi for RecordingApi {
    async fn dequeue(&self) -> ApiResult<()> {
        self.record(ApiCall::Dequeue);
        Ok(())
    }

    async fn requeue(&self) -> ApiResult<()> {
        self.record(ApiCall::Requeue);
        Ok(())
    }

    async fn set_status(&self, summary: &str, detail: Option<&str>) -> ApiResult<()> {
        self.record(ApiCall::SetStatus {
            summary: summary.to_string(),
            detail: detail.map(str::to_string),
        });
        Ok(())
    }

    async fn merge(
        &self,
        method: MergeMethod,
        title: Option<&str>,
        body: Option<&str>,
    ) -> ApiResult<()> {
        self.record(ApiCall::Merge {
            method,
            title: title.map(str::to_string),
            body: body.map(str::to_string),
        });
        match self.merge_error.lock().expect("recording mutex poisoned").take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update_branch(&self) -> ApiResult<()> {
        self.record(ApiCall::UpdateBranch);
        Ok(())
    }

    async fn approve_pr(&self) -> ApiResult<()> {
        self.record(ApiCall::ApprovePr);
        Ok(())
    }

    async fn add_label(&self, label: &str) -> ApiResult<()> {
        self.record(ApiCall::AddLabel(label.to_string()));
        Ok(())
    }

    async fn remove_label(&self, label: &str) -> ApiResult<()> {
        self.record(ApiCall::RemoveLabel(label.to_string()));
        Ok(())
    }

    async fn create_comment(&self, body: &str) -> ApiResult<()> {
        self.record(ApiCall::CreateComment(body.to_string()));
        Ok(())
    }

    async fn queue_for_merge(&self, first: bool) -> ApiResult<Option<u64>> {
        self.record(ApiCall::QueueForMerge { first });
        Ok(*self.queue_position.lock().expect("recording mutex poisoned"))
    }

    async fn delete_branch(&self, branch: &str) -> ApiResult<()> {
        self.record(ApiCall::DeleteBranch(branch.to_string()));
        Ok(())
    }

    async fn trigger_test_commit(&self) -> ApiResult<()> {
        self.record(ApiCall::TriggerTestCommit);
        Ok(())
    }

    async fn pull_requests_for_ref(&self, ref_name: &str) -> ApiResult<Option<u64>> {
        self.record(ApiCall::PullRequestsForRef(ref_name.to_string()));
        Ok(*self
            .open_prs_for_ref
            .lock()
            .expect("recording mutex poisoned"))
    }
}
