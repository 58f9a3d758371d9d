//! The mergeability evaluation engine.
//!
//! A pure, ordered decision procedure over a snapshot of pull request facts.
//! The engine has no knowledge of HTTP, Redis, or retry loops: it reads an
//! [`EvalInput`], acts through the [`PrApi`] capability trait, and returns an
//! [`Evaluation`] for the calling worker to interpret.
//!
//! - [`evaluate`]: the decision list itself
//! - [`checks`]: status-check classification against branch protection
//! - [`reviews`]: latest-actionable-review folding
//! - [`messages`]: status wording and merge commit templating

pub mod api;
pub mod checks;
pub mod evaluate;
pub mod messages;
pub mod reviews;

pub use api::{ApiCall, ApiResult, PrApi, RecordingApi};
pub use evaluate::{EvalInput, Evaluation, evaluate};
