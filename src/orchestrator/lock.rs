use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Single-flight guard: at most one item is driven at a time. The guard
/// releases on drop, so every exit path of an item frees it.
#[derive(Clone, Default)]
pub struct ProcessingLock {
    inner: Arc<Mutex<()>>,
}

pub type ProcessingGuard = OwnedMutexGuard<()>;

impl ProcessingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<ProcessingGuard> {
        Arc::clone(&self.inner).try_lock_owned().ok()
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
