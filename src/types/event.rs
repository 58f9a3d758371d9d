//! The trigger value that flows through every queue.

use serde::{Deserialize, Serialize};

use crate::types::{InstallationId, PrNumber, RepoId};

/// A request to evaluate one pull request.
///
/// This is the unit of work for both the webhook queue and the merge queue.
/// Equality and hashing cover all fields: two events for the same PR are the
/// same event, so a duplicate webhook never changes an existing queue
/// position (the store inserts with NX semantics keyed on the serialized
/// form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// The GitHub App installation the repository belongs to.
    pub installation_id: InstallationId,

    /// Repository owner login.
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// The pull request to evaluate.
    pub pr_number: PrNumber,

    /// The PR's base branch. Part of the merge-queue key, so merges to
    /// distinct branches proceed in parallel.
    pub target_branch: String,
}

impl WebhookEvent {
    pub fn new(
        installation_id: InstallationId,
        repo: &RepoId,
        pr_number: PrNumber,
        target_branch: impl Into<String>,
    ) -> Self {
        WebhookEvent {
            installation_id,
            owner: repo.owner.clone(),
            repo: repo.repo.clone(),
            pr_number,
            target_branch: target_branch.into(),
        }
    }

    /// The repository this event refers to.
    pub fn repo_id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.repo)
    }

    /// Serializes the event to its canonical store representation.
    ///
    /// Serialization of this type cannot fail: every field is a string or an
    /// integer newtype.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("WebhookEvent serialization is infallible")
    }

    /// Parses an event from its store representation.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_event() -> impl Strategy<Value = WebhookEvent> {
        (
            any::<u64>(),
            "[a-z]{1,10}",
            "[a-z]{1,10}",
            any::<u64>(),
            "[a-z/._-]{1,20}",
        )
            .prop_map(|(inst, owner, repo, pr, branch)| WebhookEvent {
                installation_id: InstallationId(inst),
                owner,
                repo,
                pr_number: PrNumber(pr),
                target_branch: branch,
            })
    }

    proptest! {
        #[test]
        fn json_roundtrip_preserves_identity(event in arb_event()) {
            let parsed = WebhookEvent::from_json(&event.to_json()).unwrap();
            prop_assert_eq!(event, parsed);
        }

        /// Serialized form is deterministic, so store-level dedupe by value works.
        #[test]
        fn serialization_is_deterministic(event in arb_event()) {
            prop_assert_eq!(event.to_json(), event.clone().to_json());
        }
    }
}
