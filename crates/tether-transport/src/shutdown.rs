//! Shared cancellation token for coordinating background task shutdown.
//!
//! Connections, channels and the server each need a liveness flag, a `watch`
//! channel that tells background tasks to stop, and somewhere to keep the
//! tasks' `JoinHandle`s. [`ShutdownToken`] bundles the three.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A cancellation token that coordinates shutdown of background tasks.
///
/// 1. Create with [`ShutdownToken::new()`].
/// 2. Hand each background task a receiver from [`subscribe()`](Self::subscribe)
///    and check it in a `tokio::select!` branch.
/// 3. Register spawned handles with [`add_task()`](Self::add_task).
/// 4. To stop, call [`signal_stop()`](Self::signal_stop), then
///    [`join_all()`](Self::join_all).
pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    online: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    /// Create a new token in the "not online, not stopped" state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            stop_tx,
            stop_rx,
            online: AtomicBool::new(false),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a new subscription to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    // -- Online state --

    pub fn set_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    pub fn set_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    // -- Task management --

    /// Register an additional background task handle.
    ///
    /// Finished handles are pruned on every call so long-lived tokens do not
    /// accumulate them.
    pub fn add_task(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    // -- Shutdown sequence --

    /// Send the stop signal to all subscribers. Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn signal_stop_and_go_offline(&self) {
        self.signal_stop();
        self.set_offline();
    }

    /// Await all registered background tasks, draining the handle list.
    ///
    /// `JoinError`s (panics, cancellations) are ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
