//! Generic write-coalescing patch queue.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;

use super::patch::{merge_patch, merged, Patch};
use super::scheduler::DebounceScheduler;
use crate::error::Result;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

/// Identity of a remote entity
pub trait EntityKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Sends one coalesced patch to the backend
#[async_trait]
pub trait RemoteUpdater<K: EntityKey>: Send + Sync {
    /// Apply `patch` to the entity at `key`
    async fn update_entity(&self, key: &K, patch: &Patch) -> Result<()>;
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entities sent
    pub attempted: usize,
    /// Entities the backend accepted
    pub succeeded: usize,
    /// Entities put back into the queue after failing
    pub requeued: usize,
}

struct QueueInner<K: EntityKey> {
    name: &'static str,
    pending: Mutex<HashMap<K, Patch>>,
    updater: Arc<dyn RemoteUpdater<K>>,
    scheduler: DebounceScheduler,
}

/// Coalesces patches per entity and sends them after a quiet period
///
/// Cheap to clone; clones share one pending map and one timer.
pub struct PatchQueue<K: EntityKey> {
    inner: Arc<QueueInner<K>>,
}

impl<K: EntityKey> Clone for PatchQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: EntityKey> Debug for PatchQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.pending_len())
            .field("delay", &self.inner.scheduler.delay())
            .finish()
    }
}

impl<K: EntityKey> PatchQueue<K> {
    /// Create a queue named `name` (used in logs)
    pub fn new(name: &'static str, updater: Arc<dyn RemoteUpdater<K>>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                pending: Mutex::new(HashMap::new()),
                updater,
                scheduler: DebounceScheduler::new(debounce),
            }),
        }
    }

    /// Queue `patch` for `key`
    ///
    /// Folds into any pending patch for the same key and arms the flush
    /// timer if it is not armed yet. Never blocks on the network.
    pub fn enqueue(&self, key: K, patch: Patch) {
        {
            let mut pending = self.inner.pending.lock();
            match pending.get_mut(&key) {
                Some(existing) => merge_patch(existing, patch),
                None => {
                    pending.insert(key, patch);
                }
            }
        }

        let queue = self.clone();
        self.inner.scheduler.schedule(move || async move {
            queue.flush().await;
        });
    }

    /// Send everything pending
    ///
    /// The pending map is swapped out before the first await, so patches
    /// queued while requests are in flight land in the fresh map. A failed
    /// patch goes back under any newer pending patch for its key (newer
    /// fields win) and waits for the next flush; nothing is rescheduled.
    pub async fn flush(&self) -> FlushReport {
        let items: Vec<(K, Patch)> = {
            let mut pending = self.inner.pending.lock();
            pending.drain().collect()
        };

        if items.is_empty() {
            return FlushReport::default();
        }

        let attempted = items.len();
        tracing::debug!("Flushing {} {} patch(es)", attempted, self.inner.name);

        let outcomes = join_all(items.into_iter().map(|(key, patch)| {
            let inner = self.inner.clone();
            async move {
                match inner.updater.update_entity(&key, &patch).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "{} patch flush failed for {:?}: {}",
                            inner.name,
                            key,
                            e
                        );
                        inner.requeue(key, patch);
                        false
                    }
                }
            }
        }))
        .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        FlushReport {
            attempted,
            succeeded,
            requeued: attempted - succeeded,
        }
    }

    /// Cancel the timer and flush immediately (page hide / shutdown)
    pub async fn flush_now(&self) -> FlushReport {
        self.inner.scheduler.cancel();
        self.flush().await
    }

    /// Number of entities with a pending patch
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Copy of the pending patch for `key`
    pub fn pending_patch(&self, key: &K) -> Option<Patch> {
        self.inner.pending.lock().get(key).cloned()
    }

    /// Whether a flush is scheduled
    pub fn is_scheduled(&self) -> bool {
        self.inner.scheduler.is_armed()
    }
}

impl<K: EntityKey> QueueInner<K> {
    fn requeue(&self, key: K, failed: Patch) {
        let mut pending = self.pending.lock();
        let restored = match pending.remove(&key) {
            Some(newer) => merged(failed, newer),
            None => failed,
        };
        pending.insert(key, restored);
    }
}

// ============================================================================
// TESTS
// ============================================================================
