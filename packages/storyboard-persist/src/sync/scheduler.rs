//! Single-shot debounce timer.
//!
//! At most one timer is armed at a time. The timer disarms itself *before*
//! running its action, so anything scheduled while the action runs arms a
//! fresh timer. Every arming carries a generation number, and a firing
//! timer only clears the slot while it still holds its own generation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type Slot = Arc<Mutex<Option<(u64, JoinHandle<()>)>>>;

/// One pending delayed action
#[derive(Debug)]
pub struct DebounceScheduler {
    delay: Duration,
    armed: Slot,
    generation: AtomicU64,
}

impl DebounceScheduler {
    /// Create a scheduler that fires `delay` after arming
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// The configured delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True while a timer is armed and has not fired
    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }

    /// Arm the timer unless it already is
    ///
    /// Returns whether a new timer was armed. Outside a tokio runtime
    /// nothing is armed and the caller has to flush explicitly.
    pub fn schedule<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut armed = self.armed.lock();
        if armed.is_some() {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No tokio runtime; debounce timer not armed");
                return false;
            }
        };

        let delay = self.delay;
        let slot = self.armed.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Disarm first so work queued during the action re-arms.
            disarm(&slot, generation);
            action().await;
        });
        *armed = Some((generation, handle));
        true
    }

    /// Disarm without firing. A timer that already fired keeps running.
    pub fn cancel(&self) -> bool {
        match self.armed.lock().take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Clear `slot` if it still holds `generation`
fn disarm(slot: &Slot, generation: u64) -> bool {
    let mut armed = slot.lock();
    match armed.as_ref() {
        Some((current, _)) if *current == generation => {
            armed.take();
            true
        }
        _ => false,
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
