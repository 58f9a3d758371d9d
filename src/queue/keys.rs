//! Store key layout.
//!
//! The layout is an external contract: other deployments sharing the store
//! must agree on it. It is centralized here and covered by exact-format
//! tests.

use crate::types::{InstallationId, WebhookEvent};

/// Discovery set of all webhook queue names, for restart recovery.
pub const WEBHOOK_QUEUE_NAMES: &str = "webhook_queue_names";

/// Discovery set of all merge queue names, for restart recovery.
pub const MERGE_QUEUE_NAMES: &str = "merge_queue_names";

/// Sorted-set key of an installation's webhook queue.
pub fn webhook_queue_key(installation: InstallationId) -> String {
    format!("webhook:{installation}")
}

/// Sorted-set key of the merge queue an event belongs to. The branch is
/// URL-escaped, so the key always splits unambiguously on `/`.
pub fn merge_queue_key(event: &WebhookEvent) -> String {
    format!(
        "merge_queue:{}.{}/{}/{}",
        event.installation_id,
        event.owner,
        event.repo,
        urlencoding::encode(&event.target_branch)
    )
}

/// Key holding the serialized entry a merge worker currently owns.
pub fn active_merge_key(merge_queue_key: &str) -> String {
    format!("{merge_queue_key}:target")
}

/// Hash key of an account's billing state.
pub fn subscription_key(installation: InstallationId) -> String {
    format!("subscription:{installation}")
}

/// Recovers the installation id from a webhook queue name.
pub fn parse_webhook_queue_key(key: &str) -> Option<InstallationId> {
    let id = key.strip_prefix("webhook:")?;
    id.parse().ok().map(InstallationId)
}
