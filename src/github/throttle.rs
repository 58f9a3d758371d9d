//! Per-installation sliding-window rate limiting.
//!
//! GitHub grants each installation roughly 5,000 requests per hour. Every
//! outbound call acquires a slot here first; when the trailing window is
//! full, `acquire` sleeps and re-checks on a fixed interval until a slot
//! frees up.
//!
//! The timestamp windows are process-local and injected into the client
//! rather than global, so multiple test instances (or multiple processes,
//! each with its own budget share) never cross-contaminate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::types::InstallationId;

/// Default per-installation budget: requests per trailing hour.
pub const DEFAULT_RATE_PER_HOUR: usize = 5000;

/// Length of the sliding window.
const WINDOW: Duration = Duration::from_secs(3600);

/// How long to sleep between re-checks when the window is full.
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// How long a fetched rate override stays fresh.
const OVERRIDE_TTL: Duration = Duration::from_secs(60);

struct Window {
    timestamps: VecDeque<Instant>,
}

struct CachedRate {
    rate: usize,
    fetched_at: Instant,
}

/// Sliding-window throttler over all installations this process serves.
pub struct Throttler {
    default_rate: usize,
    windows: Mutex<HashMap<InstallationId, Window>>,
    /// Short-TTL cache of per-installation rate overrides.
    overrides: Mutex<HashMap<InstallationId, CachedRate>>,
}

impl Throttler {
    pub fn new(default_rate: usize) -> Arc<Self> {
        Arc::new(Throttler {
            default_rate,
            windows: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
        })
    }

    /// Records an override for one installation (e.g. read from the store
    /// when an operator raises a customer's budget).
    pub async fn set_override(&self, installation: InstallationId, rate: usize) {
        self.overrides.lock().await.insert(
            installation,
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn rate_for(&self, installation: InstallationId) -> usize {
        let overrides = self.overrides.lock().await;
        match overrides.get(&installation) {
            Some(cached) if cached.fetched_at.elapsed() < OVERRIDE_TTL => cached.rate,
            _ => self.default_rate,
        }
    }

    /// Blocks until a call slot is available in the installation's window,
    /// then claims it.
    pub async fn acquire(&self, installation: InstallationId) {
        let rate = self.rate_for(installation).await;
        loop {
            {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(installation).or_insert_with(|| Window {
                    timestamps: VecDeque::new(),
                });
                let now = Instant::now();
                while let Some(front) = window.timestamps.front() {
                    if now.duration_since(*front) > WINDOW {
                        window.timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if window.timestamps.len() < rate {
                    window.timestamps.push_back(now);
                    return;
                }
            }
            // Window full; wait for the oldest timestamp to age out.
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}
