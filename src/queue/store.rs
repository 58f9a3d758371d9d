//! The durable store behind every queue.
//!
//! [`QueueStore`] is the narrow contract the queueing layer needs:
//! sorted-set insert-if-absent, remove-by-value, range-with-scores,
//! blocking pop-minimum, plain key get/set, set membership, and hash reads.
//! Production runs against Redis; tests run against [`InMemoryStore`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value failed to parse back into its domain type.
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

/// The store operations the queueing layer is built on.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Adds `member` with `score` unless it is already present. Returns
    /// whether the member was inserted. Presence-preservation is what makes
    /// duplicate webhooks keep a PR's queue position.
    async fn zadd_if_absent(&self, key: &str, member: &str, score: f64)
    -> Result<bool, StoreError>;

    /// Removes `member` by value. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// The full sorted set, ordered by (score, member).
    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;

    /// Pops the minimum-score member, blocking up to `timeout` (`None` =
    /// forever) when the set is empty.
    async fn bzpopmin(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<(String, f64)>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
}

// ─── Redis implementation ─────────────────────────────────────────────────────

/// Redis-backed store used in production.
#[derive(Clone)]
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis at `url` (e.g. `redis://localhost`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = redis::aio::ConnectionManager::new(client).await?;
        Ok(RedisStore { connection })
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn zadd_if_absent(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.connection.clone();
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(entries)
    }

    async fn bzpopmin(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<(String, f64)>, StoreError> {
        let mut conn = self.connection.clone();
        // Redis treats a zero timeout as "block forever".
        let timeout_secs = timeout.map_or(0.0, |t| t.as_secs_f64());
        let popped: Option<(String, String, f64)> = redis::cmd("BZPOPMIN")
            .arg(key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_key, member, score)| (member, score)))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        Ok(redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection.clone();
        Ok(redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }
}

// ─── In-memory implementation ─────────────────────────────────────────────────

/// Poll interval for the in-memory blocking pop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct MemoryState {
    /// member → score. Ordering is re-derived on read, matching Redis's
    /// (score, member) sort.
    zsets: HashMap<String, BTreeMap<String, f64>>,
    kv: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-memory store for tests. Mirrors Redis semantics for the trait surface.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// Seeds a hash, e.g. a subscription record.
    pub fn put_hash(&self, key: &str, fields: HashMap<String, String>) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.hashes.insert(key.to_string(), fields);
    }

    fn sorted_entries(zset: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        entries
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn zadd_if_absent(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let zset = state.zsets.entry(key.to_string()).or_default();
        if zset.contains_key(member) {
            return Ok(false);
        }
        zset.insert(member.to_string(), score);
        Ok(true)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .zsets
            .get_mut(key)
            .is_some_and(|zset| zset.remove(member).is_some()))
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .zsets
            .get(key)
            .map(Self::sorted_entries)
            .unwrap_or_default())
    }

    async fn bzpopmin(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<(String, f64)>, StoreError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            {
                let mut state = self.state.lock().expect("store mutex poisoned");
                if let Some(zset) = state.zsets.get_mut(key)
                    && let Some((member, score)) = Self::sorted_entries(zset).into_iter().next()
                {
                    zset.remove(&member);
                    return Ok(Some((member, score)));
                }
            }
            if let Some(deadline) = deadline
                && tokio::time::Instant::now() >= deadline
            {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.kv.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }
}
