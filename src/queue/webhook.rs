//! The per-installation webhook queue.
//!
//! Every classified webhook lands here first. A single worker per
//! installation drains the queue and runs a passive evaluation for each
//! event. Scores are enqueue timestamps; duplicates are dropped by the
//! store's insert-if-absent, so a webhook storm for one PR costs one
//! evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use super::keys;
use super::store::{QueueStore, StoreError};
use crate::types::{InstallationId, WebhookEvent};

/// Handle to one installation's webhook queue.
#[derive(Clone)]
pub struct WebhookQueue {
    store: Arc<dyn QueueStore>,
    installation: InstallationId,
    key: String,
}

impl WebhookQueue {
    pub fn new(store: Arc<dyn QueueStore>, installation: InstallationId) -> Self {
        WebhookQueue {
            store,
            installation,
            key: keys::webhook_queue_key(installation),
        }
    }

    pub fn installation(&self) -> InstallationId {
        self.installation
    }

    /// The queue's store key. Also the worker-registry key for its worker.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Adds the event unless an identical one is already queued, and
    /// registers the queue in the discovery set.
    pub async fn enqueue(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        self.store
            .sadd(keys::WEBHOOK_QUEUE_NAMES, &self.key)
            .await?;
        let score = Utc::now().timestamp_millis() as f64;
        self.store
            .zadd_if_absent(&self.key, &event.to_json(), score)
            .await?;
        Ok(())
    }

    /// Pops the oldest event, blocking up to `timeout` when the queue is
    /// empty. A corrupt entry is dropped with a warning.
    pub async fn pop(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        loop {
            let Some((member, _score)) = self.store.bzpopmin(&self.key, timeout).await? else {
                return Ok(None);
            };
            match WebhookEvent::from_json(&member) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "dropping unparseable webhook queue entry");
                }
            }
        }
    }
}
