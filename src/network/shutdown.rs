//! Process-wide shutdown signal

use std::sync::Arc;

use tokio::sync::watch;

/// Trigger side, cloned into everything that may start a shutdown
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

/// Wait side, one per task that must stop on shutdown
///
/// Listeners created after the trigger observe it immediately.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create an untriggered signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been triggered
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// New listener
    #[must_use]
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownListener {
    /// Resolve once shutdown is triggered (or the trigger side is gone)
    pub async fn wait(&mut self) {
        // Only errors once every sender is dropped, which also means shutdown
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
