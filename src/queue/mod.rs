//! Durable queueing on top of the shared store.
//!
//! Two queue families exist:
//!
//! - one **webhook queue** per installation, feeding passive evaluations
//! - one **merge queue** per (installation, owner, repo, branch), feeding
//!   serialized merge attempts
//!
//! Queue names are registered in durable discovery sets so a restarted
//! process can respawn a worker per known queue. The invariant "at most one
//! active worker per queue key" is enforced by the in-process
//! [`supervisor::WorkerRegistry`], per process only; a multi-replica
//! deployment would need a distributed lock instead.

pub mod keys;
pub mod merge;
pub mod store;
pub mod supervisor;
pub mod webhook;

pub use merge::MergeQueue;
pub use store::{InMemoryStore, QueueStore, RedisStore, StoreError};
pub use supervisor::WorkerRegistry;
pub use webhook::WebhookQueue;
