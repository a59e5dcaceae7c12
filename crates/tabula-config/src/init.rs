//! One-time initialisation guard for the backing table.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

/// Observable initialisation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// No caller has completed initialisation yet.
    Uninitialized,
    /// A caller holds the lock and is running the initialiser.
    Initializing,
    /// Initialisation completed; callers skip it entirely.
    Ready,
}

/// Double-checked initialisation flag scoped to one settings source.
///
/// At most one caller runs the initialiser; concurrent callers wait on the
/// same lock and observe `Ready` once it completes. A failed initialiser
/// leaves the guard uninitialised so the next caller retries.
#[derive(Debug, Default)]
pub struct InitGuard {
    ready: AtomicBool,
    lock: Mutex<()>,
}

impl InitGuard {
    /// Create an uninitialised guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of the guard.
    #[must_use]
    pub fn state(&self) -> InitState {
        if self.ready.load(Ordering::Acquire) {
            InitState::Ready
        } else if self.lock.try_lock().is_err() {
            InitState::Initializing
        } else {
            InitState::Uninitialized
        }
    }

    /// Run `init` unless a previous call already succeeded.
    ///
    /// # Errors
    ///
    /// Propagates the initialiser's error; the guard stays uninitialised.
    pub async fn ensure<F, Fut, E>(&self, init: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let _held = self.lock.lock().await;
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        init().await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }
}
