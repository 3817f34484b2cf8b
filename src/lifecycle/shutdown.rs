//! Stop signalling for one server instance.
//!
//! Every start creates a fresh [`Shutdown`]; the serve loop, the TLS
//! handle watcher and any endpoint registrant that spawned background
//! work subscribe to it. Stopping fires it once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How long `stop` waits for in-flight requests before aborting the serve task.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-once stop signal shared by a serving instance and its tasks.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    fired: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// A receiver that resolves once [`Shutdown::trigger`] fires.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("fired", &self.is_triggered())
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// Resolve once `rx` fires or its sender is dropped.
pub async fn signalled(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

/// Wait for a serve task to finish, aborting it after `timeout`.
pub async fn drain<T>(task: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let abort = task.abort_handle();
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Serve task failed");
            None
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Drain timed out, aborting in-flight requests"
            );
            abort.abort();
            None
        }
    }
}
