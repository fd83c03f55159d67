//! Exclusion lock around input injection.

use std::future::Future;
use tokio::sync::Mutex;
use tracing::trace;

/// Serializes every operation that mutates the desktop's input state.
///
/// Not reentrant: calling [`ExclusionLock::with_lock`] from inside the
/// closure of another `with_lock` on the same lock deadlocks.
#[derive(Debug, Default)]
pub struct ExclusionLock {
    inner: Mutex<()>,
}

impl ExclusionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock and return its output unchanged.
    ///
    /// The guard is dropped on every exit path, including errors returned by
    /// `f` and panics unwinding through it.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        trace!("Exclusion lock acquired");
        f().await
    }

    /// Whether some task currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
