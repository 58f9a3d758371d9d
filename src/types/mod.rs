//! Core domain types for the bot.

pub mod event;
pub mod ids;
pub mod pr;

pub use event::WebhookEvent;
pub use ids::{InstallationId, PrNumber, RepoId, Sha};
pub use pr::{
    BranchProtectionRule, CheckConclusion, CheckRun, CommitAuthor, MergeMethod, MergeStateStatus,
    MergeableState, Permission, PullRequestFacts, PullRequestState, RepositoryFlags, Review,
    ReviewRequest, ReviewState, StatusContext, StatusState, Subscription, SubscriptionBlocker,
};
