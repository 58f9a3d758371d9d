//! Classification of webhook payloads into evaluation triggers.
//!
//! Each relevant event type is mapped to zero or more [`WebhookEvent`]s:
//!
//! - `pull_request` → the one PR in the payload
//! - `check_run` → every PR associated with the check run, skipping check
//!   runs the bot itself created (avoids self-triggering loops)
//! - `status` → open PRs whose head branch matches the commit, falling back
//!   to listing all open PRs when the event carries no branch info (fork PRs)
//! - `push` → open PRs whose base ref equals the pushed branch
//!
//! Only the fields consumed here are deserialized; GitHub's payloads carry
//! far more.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::github::GitHubApiError;
use crate::types::{InstallationId, PrNumber, RepoId, WebhookEvent};

/// A minimal view of an open PR, as returned by the list endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPr {
    pub number: PrNumber,
    pub base_ref: String,
    pub head_ref: String,
}

/// The lookup capability `status` and `push` classification needs.
///
/// Implemented by the production GitHub client and by in-memory fakes in
/// tests.
#[async_trait]
pub trait OpenPrSource {
    /// Lists open PRs, optionally filtered by base branch or by head
    /// (`owner:branch` form).
    async fn open_prs(
        &self,
        installation: InstallationId,
        repo: &RepoId,
        base: Option<&str>,
        head: Option<&str>,
    ) -> Result<Vec<OpenPr>, GitHubApiError>;
}

/// Errors from webhook classification.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload was not the JSON shape we expect for this event type.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A PR lookup against GitHub failed.
    #[error("lookup failed: {0}")]
    Lookup(#[from] GitHubApiError),
}

// ─── Payload shapes (thin DTOs) ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

impl Repository {
    fn repo_id(&self) -> RepoId {
        RepoId::new(&self.owner.login, &self.name)
    }
}

#[derive(Debug, Deserialize)]
struct BaseRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PrRef {
    number: u64,
    base: BaseRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    installation: Installation,
    repository: Repository,
    pull_request: PrRef,
}

#[derive(Debug, Deserialize)]
struct CheckRunApp {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CheckRunInner {
    app: Option<CheckRunApp>,
    #[serde(default)]
    pull_requests: Vec<PrRef>,
}

#[derive(Debug, Deserialize)]
struct CheckRunPayload {
    installation: Installation,
    repository: Repository,
    check_run: CheckRunInner,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct StatusBranch {
    name: String,
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    installation: Installation,
    repository: Repository,
    sha: String,
    #[serde(default)]
    branches: Vec<StatusBranch>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    installation: Installation,
    repository: Repository,
    #[serde(rename = "ref")]
    ref_name: String,
}

// ─── Classification ───────────────────────────────────────────────────────────

/// Classifies a verified webhook payload into evaluation triggers.
///
/// Unknown event types produce no triggers. `own_app_id` is the bot's GitHub
/// App ID, used to ignore its own check runs.
pub async fn resolve_events<S: OpenPrSource + Sync>(
    event_type: &str,
    body: &[u8],
    own_app_id: Option<u64>,
    source: &S,
) -> Result<Vec<WebhookEvent>, IngestError> {
    match event_type {
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_slice(body)?;
            let repo = payload.repository.repo_id();
            Ok(vec![WebhookEvent::new(
                InstallationId(payload.installation.id),
                &repo,
                PrNumber(payload.pull_request.number),
                payload.pull_request.base.ref_name,
            )])
        }
        "check_run" => {
            let payload: CheckRunPayload = serde_json::from_slice(body)?;
            // Status reports the bot posts are check runs themselves; reacting
            // to them would loop forever.
            if let (Some(app), Some(own)) = (&payload.check_run.app, own_app_id)
                && app.id == own
            {
                return Ok(Vec::new());
            }
            let installation = InstallationId(payload.installation.id);
            let repo = payload.repository.repo_id();
            Ok(payload
                .check_run
                .pull_requests
                .into_iter()
                .map(|pr| {
                    WebhookEvent::new(installation, &repo, PrNumber(pr.number), pr.base.ref_name)
                })
                .collect())
        }
        "status" => {
            let payload: StatusPayload = serde_json::from_slice(body)?;
            let installation = InstallationId(payload.installation.id);
            let repo = payload.repository.repo_id();

            let mut events: HashSet<WebhookEvent> = HashSet::new();
            let matching: Vec<&StatusBranch> = payload
                .branches
                .iter()
                .filter(|b| b.commit.sha == payload.sha)
                .collect();

            if matching.is_empty() {
                // Fork PRs carry no branch info; fall back to every open PR.
                for pr in source.open_prs(installation, &repo, None, None).await? {
                    events.insert(WebhookEvent::new(installation, &repo, pr.number, pr.base_ref));
                }
            } else {
                for branch in matching {
                    let head = format!("{}:{}", repo.owner, branch.name);
                    for pr in source
                        .open_prs(installation, &repo, None, Some(&head))
                        .await?
                    {
                        events.insert(WebhookEvent::new(
                            installation,
                            &repo,
                            pr.number,
                            pr.base_ref,
                        ));
                    }
                }
            }
            Ok(events.into_iter().collect())
        }
        "push" => {
            let payload: PushPayload = serde_json::from_slice(body)?;
            let Some(branch) = payload.ref_name.strip_prefix("refs/heads/") else {
                // Tag pushes and the like.
                return Ok(Vec::new());
            };
            let installation = InstallationId(payload.installation.id);
            let repo = payload.repository.repo_id();
            Ok(source
                .open_prs(installation, &repo, Some(branch), None)
                .await?
                .into_iter()
                .map(|pr| WebhookEvent::new(installation, &repo, pr.number, pr.base_ref))
                .collect())
        }
        _ => Ok(Vec::new()),
    }
}
