use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// A fixed set of async mutexes selected by key hash. Unrelated keys may
/// share a shard; equal keys always do.
pub(crate) struct ShardedLocks {
    shards: Vec<Mutex<()>>,
}

impl ShardedLocks {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) async fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock().await
    }

    /// Lock keyed by the unordered pair `{a, b}`.
    pub(crate) async fn lock_pair(&self, a: &str, b: &str) -> MutexGuard<'_, ()> {
        let pair = if a <= b { (a, b) } else { (b, a) };
        self.lock(&pair).await
    }
}
