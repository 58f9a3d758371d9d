//! Worker lifecycle: one task per queue, respawned if it dies.
//!
//! The registry holds, per queue key, the running task handle plus a factory
//! that can spawn a replacement. `ensure` is idempotent, which upholds the
//! "at most one worker per queue" invariant within a process. A supervision
//! loop sweeps the registry on an interval, reaps finished tasks, and
//! respawns them; a healthy worker never finishes, so any completed handle
//! is a crash or panic.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type SpawnFn = Box<dyn Fn() -> JoinHandle<()> + Send + Sync>;

struct WorkerSlot {
    handle: JoinHandle<()>,
    respawn: SpawnFn,
}

/// Process-wide registry of queue workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerSlot>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry::default()
    }

    /// Registers a worker for `key` and starts it, unless one is already
    /// registered. Returns whether a new worker was spawned.
    pub async fn ensure<F>(&self, key: &str, spawn: F) -> bool
    where
        F: Fn() -> JoinHandle<()> + Send + Sync + 'static,
    {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(key) {
            return false;
        }
        info!(%key, "starting queue worker");
        let handle = spawn();
        workers.insert(
            key.to_string(),
            WorkerSlot {
                handle,
                respawn: Box::new(spawn),
            },
        );
        true
    }

    /// The number of registered workers.
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    /// Sweeps the registry once: every finished worker is reaped and
    /// respawned in place. Returns the keys that were respawned.
    pub async fn check_and_respawn(&self) -> Vec<String> {
        let mut workers = self.workers.lock().await;
        let mut respawned = Vec::new();
        for (key, slot) in workers.iter_mut() {
            if !slot.handle.is_finished() {
                continue;
            }
            match (&mut slot.handle).await {
                Ok(()) => warn!(%key, "queue worker exited, respawning"),
                Err(e) => error!(%key, error = %e, "queue worker panicked, respawning"),
            }
            slot.handle = (slot.respawn)();
            respawned.push(key.clone());
        }
        respawned
    }

    /// Runs the supervision sweep forever on the given interval.
    pub async fn supervise(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.check_and_respawn().await;
        }
    }
}
