use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Self-managed one-shot timer that asks the dispatch worker to run a tick.
///
/// At most one tick is pending at a time: scheduling replaces the previous
/// timer, cancelling removes it. Ticks are delivered on the channel returned
/// by [`TickTrigger::new`].
pub struct TickTrigger {
    tx: mpsc::Sender<()>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TickTrigger {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Self {
                tx,
                pending: Mutex::new(None),
            },
            rx,
        )
    }

    /// Fire a tick after `delay`, replacing any pending one.
    pub fn schedule_after(&self, delay: Duration) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the worker shut down.
            let _ = tx.send(()).await;
        });
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = pending.replace(handle) {
            old.abort();
        }
        debug!(delay_ms = delay.as_millis() as u64, "Dispatch tick scheduled");
    }

    /// Drop any pending tick.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = pending.take() {
            old.abort();
            debug!("Dispatch tick cancelled");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}
