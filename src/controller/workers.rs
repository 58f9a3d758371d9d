//! Queue worker loops and their lifecycle.
//!
//! One webhook worker per installation drains that installation's webhook
//! queue and runs passive evaluations. One merge worker per merge-queue key
//! owns the active-merge marker and runs merging-mode evaluations, strictly
//! serialized. Loops never return; a panic or unexpected exit is observed by
//! the supervisor sweep, which respawns a fresh task on the same key.
//!
//! A queue entry is popped before it is processed, so a crash mid-evaluation
//! loses that entry. This is at-most-once delivery; the next webhook for the
//! PR re-enters it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Controller, MergeRun};
use crate::queue::{MergeQueue, QueueStore, WebhookQueue, WorkerRegistry, keys};
use crate::types::{InstallationId, WebhookEvent};

/// Backoff after a store failure, so a dead Redis does not spin the loop.
const STORE_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a worker needs; cheap to clone into spawn closures.
#[derive(Clone)]
pub struct WorkerContext {
    pub controller: Arc<Controller>,
    pub store: Arc<dyn QueueStore>,
    pub registry: Arc<WorkerRegistry>,
}

impl WorkerContext {
    pub fn new(
        controller: Arc<Controller>,
        store: Arc<dyn QueueStore>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        WorkerContext {
            controller,
            store,
            registry,
        }
    }

    /// Starts (idempotently) the webhook worker for an installation.
    pub async fn ensure_webhook_worker(&self, installation: InstallationId) {
        let key = keys::webhook_queue_key(installation);
        let ctx = self.clone();
        self.registry
            .ensure(&key, move || {
                let ctx = ctx.clone();
                tokio::spawn(async move { webhook_worker_loop(ctx, installation).await })
            })
            .await;
    }

    /// Starts (idempotently) the merge worker for a merge-queue key.
    pub async fn ensure_merge_worker(&self, queue_key: &str) {
        let ctx = self.clone();
        let key = queue_key.to_string();
        self.registry
            .ensure(queue_key, move || {
                let ctx = ctx.clone();
                let key = key.clone();
                tokio::spawn(async move { merge_worker_loop(ctx, key).await })
            })
            .await;
    }

    /// Respawns a worker for every queue name in the durable discovery
    /// sets. Called once at process start.
    pub async fn recover_workers(&self) -> Result<(), crate::queue::StoreError> {
        for key in self.store.smembers(keys::WEBHOOK_QUEUE_NAMES).await? {
            match keys::parse_webhook_queue_key(&key) {
                Some(installation) => self.ensure_webhook_worker(installation).await,
                None => error!(%key, "unparseable webhook queue name in discovery set"),
            }
        }
        for key in self.store.smembers(keys::MERGE_QUEUE_NAMES).await? {
            self.ensure_merge_worker(&key).await;
        }
        info!(workers = self.registry.len().await, "recovered queue workers");
        Ok(())
    }
}

/// Drains one installation's webhook queue forever.
async fn webhook_worker_loop(ctx: WorkerContext, installation: InstallationId) {
    let queue = WebhookQueue::new(ctx.store.clone(), installation);
    info!(%installation, "webhook worker started");
    loop {
        let event = match queue.pop(None).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                error!(%installation, error = %e, "webhook queue pop failed");
                tokio::time::sleep(STORE_FAILURE_BACKOFF).await;
                continue;
            }
        };

        debug!(%installation, pr = %event.pr_number, "processing webhook event");
        if let Err(e) = ctx.controller.run_passive(&event).await {
            error!(%installation, pr = %event.pr_number, error = %e, "passive evaluation failed");
        }
        // A worker must exist for whichever merge queue the evaluation may
        // have fed.
        ctx.ensure_merge_worker(&keys::merge_queue_key(&event)).await;
    }
}

/// Serializes merge attempts for one branch forever.
async fn merge_worker_loop(ctx: WorkerContext, queue_key: String) {
    let queue = MergeQueue::from_key(ctx.store.clone(), queue_key.clone());
    info!(key = %queue_key, "merge worker started");
    loop {
        let event = match queue.pop_front(None).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                error!(key = %queue_key, error = %e, "merge queue pop failed");
                tokio::time::sleep(STORE_FAILURE_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = queue.set_active(&event).await {
            error!(key = %queue_key, error = %e, "failed to record active merge");
        }

        let run = ctx.controller.run_merge(&event).await;
        match &run {
            Ok(MergeRun::Completed) => {
                // Terminal outcome; drop any entry re-added by passive
                // evaluations while we held the PR.
                if let Err(e) = queue.remove(&event).await {
                    error!(key = %queue_key, error = %e, "failed to remove finished entry");
                }
            }
            Ok(MergeRun::Requeued) => {
                debug!(key = %queue_key, pr = %event.pr_number, "entry requeued after timeout");
            }
            Err(e) => {
                error!(key = %queue_key, pr = %event.pr_number, error = %e, "merge run failed");
            }
        }

        if let Err(e) = queue.clear_active().await {
            error!(key = %queue_key, error = %e, "failed to clear active merge");
        }
    }
}

/// Spawns the supervision loop that reaps and respawns dead workers.
pub fn spawn_supervisor(registry: Arc<WorkerRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move { registry.supervise(interval).await })
}

/// Enqueues classified events and makes sure their workers exist.
pub async fn enqueue_events(
    ctx: &WorkerContext,
    events: Vec<WebhookEvent>,
) -> Result<(), crate::queue::StoreError> {
    for event in events {
        let queue = WebhookQueue::new(ctx.store.clone(), event.installation_id);
        queue.enqueue(&event).await?;
        ctx.ensure_webhook_worker(event.installation_id).await;
    }
    Ok(())
}
