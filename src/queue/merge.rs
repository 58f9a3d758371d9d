//! The per-branch merge queue.
//!
//! Each (installation, owner, repo, target branch) tuple gets its own sorted
//! set, so merges into distinct branches proceed in parallel while merges
//! into the same branch are strictly serialized. Scores are enqueue
//! timestamps in milliseconds, which gives FIFO order; a front-override
//! enqueues with score 1.0, below any realistic timestamp.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use super::keys;
use super::store::{QueueStore, StoreError};
use crate::types::WebhookEvent;

/// Score used by the front-override path. Any timestamp-scored entry sorts
/// after it.
const FRONT_SCORE: f64 = 1.0;

/// Handle to one branch's merge queue.
#[derive(Clone)]
pub struct MergeQueue {
    store: Arc<dyn QueueStore>,
    key: String,
}

impl MergeQueue {
    /// Opens the queue the event belongs to.
    pub fn for_event(store: Arc<dyn QueueStore>, event: &WebhookEvent) -> Self {
        MergeQueue {
            store,
            key: keys::merge_queue_key(event),
        }
    }

    /// Opens a queue by its store key, as recovered from the discovery set.
    pub fn from_key(store: Arc<dyn QueueStore>, key: impl Into<String>) -> Self {
        MergeQueue {
            store,
            key: key.into(),
        }
    }

    /// The queue's store key. Also the worker-registry key for its worker.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Adds the event unless it is already queued, registers the queue in the
    /// discovery set, and returns the event's 1-based position. A duplicate
    /// enqueue never moves an entry. With `first`, a newly inserted entry
    /// sorts ahead of every timestamp-scored one.
    pub async fn enqueue(&self, event: &WebhookEvent, first: bool) -> Result<u64, StoreError> {
        self.store
            .sadd(keys::MERGE_QUEUE_NAMES, &self.key)
            .await?;
        let score = if first {
            FRONT_SCORE
        } else {
            Utc::now().timestamp_millis() as f64
        };
        self.store
            .zadd_if_absent(&self.key, &event.to_json(), score)
            .await?;
        match self.position(event).await? {
            Some(position) => Ok(position),
            None => {
                // The entry was popped by the worker between our insert and
                // read.
                warn!(key = %self.key, pr = %event.pr_number, "entry popped before position read");
                Ok(1)
            }
        }
    }

    /// Removes the event from the queue. Returns whether it was present.
    pub async fn remove(&self, event: &WebhookEvent) -> Result<bool, StoreError> {
        self.store.zrem(&self.key, &event.to_json()).await
    }

    /// The event's 1-based queue position, if it is queued.
    pub async fn position(&self, event: &WebhookEvent) -> Result<Option<u64>, StoreError> {
        let serialized = event.to_json();
        let entries = self.store.zrange_with_scores(&self.key).await?;
        Ok(entries
            .iter()
            .position(|(member, _)| *member == serialized)
            .map(|index| index as u64 + 1))
    }

    /// Pops the frontmost entry, blocking up to `timeout` when the queue is
    /// empty. A corrupt entry is dropped with a warning rather than wedging
    /// the worker.
    pub async fn pop_front(
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
                    warn!(key = %self.key, error = %e, "dropping unparseable merge queue entry");
                }
            }
        }
    }

    /// Records the event the worker is actively merging. While set, the
    /// entry is owned by the worker and is no longer in the sorted set.
    pub async fn set_active(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        self.store
            .set(&keys::active_merge_key(&self.key), &event.to_json())
            .await
    }

    /// The event currently being merged, if any.
    pub async fn active(&self) -> Result<Option<WebhookEvent>, StoreError> {
        let Some(raw) = self.store.get(&keys::active_merge_key(&self.key)).await? else {
            return Ok(None);
        };
        let event = WebhookEvent::from_json(&raw)
            .map_err(|e| StoreError::Corrupt(format!("active merge entry: {e}")))?;
        Ok(Some(event))
    }

    /// Clears the active-merge marker.
    pub async fn clear_active(&self) -> Result<(), StoreError> {
        self.store.del(&keys::active_merge_key(&self.key)).await
    }

    /// Whether `event` is the one currently being merged.
    pub async fn is_active(&self, event: &WebhookEvent) -> Result<bool, StoreError> {
        Ok(self.active().await?.as_ref() == Some(event))
    }
}
