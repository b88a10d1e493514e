//! Memoized start gate
//!
//! Runs an async initializer at most once per epoch, however many callers race
//! for it. Callers arriving while the initializer runs wait for its result;
//! callers arriving later get the memoized value. A failed run is not
//! memoized, so the next caller tries again. Moving to a newer epoch discards
//! the memoized value.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug)]
pub struct StartGate<T> {
    slot: Mutex<(u64, Arc<OnceCell<T>>)>,
}

impl<T> Default for StartGate<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new((0, Arc::new(OnceCell::new()))),
        }
    }
}

impl<T: Clone> StartGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `init` unless it already ran (or is running) for `epoch`.
    pub async fn run<F, Fut, E>(&self, epoch: u64, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut slot = self.slot.lock();
            if epoch > slot.0 {
                *slot = (epoch, Arc::new(OnceCell::new()));
            }
            Arc::clone(&slot.1)
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// Discard the memoized value if `stale` says so. Callers already waiting
    /// on that run keep its result; the next caller runs the initializer again.
    /// A run still in flight is left alone.
    pub fn forget_if(&self, stale: impl FnOnce(&T) -> bool) {
        let mut slot = self.slot.lock();
        if slot.1.get().is_some_and(stale) {
            let epoch = slot.0;
            *slot = (epoch, Arc::new(OnceCell::new()));
        }
    }

    #[cfg(test)]
    fn peek(&self) -> Option<T> {
        self.slot.lock().1.get().cloned()
    }
}
