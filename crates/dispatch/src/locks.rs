//! Process-wide named locks with bounded acquisition.
//!
//! Credit balance and lead-tab mutations happen while holding one of these;
//! run sessions are guarded by the session file lock instead. Guards release on drop, so early
//! returns and `?` never leak a held lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use callrun_core::CallRunError;

/// Guards the run-start path and batch ticks.
pub const DISPATCH_LOCK: &str = "dispatch";
/// Guards the credit balance.
pub const CREDIT_LOCK: &str = "credit";
/// Guards run markers and call dates on the live lead tab. Taken by dispatch
/// marking and by ingestion write-back.
pub const LEAD_TAB_LOCK: &str = "lead_tab";

/// Wait budgets.
pub const STARTUP_LOCK_WAIT: Duration = Duration::from_secs(5);
pub const TICK_LOCK_WAIT: Duration = Duration::from_secs(15);
pub const CREDIT_LOCK_WAIT: Duration = Duration::from_secs(10);
pub const LEAD_TAB_LOCK_WAIT: Duration = Duration::from_secs(15);

/// A held named lock.
pub struct LockGuard {
    name: &'static str,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(lock = self.name, "Lock released");
    }
}

#[derive(Default)]
pub struct ProcessLocks {
    locks: StdMutex<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl ProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: &'static str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(name).or_default().clone()
    }

    /// Wait up to `wait` for the lock; a timeout is a retryable conflict.
    pub async fn acquire(&self, name: &'static str, wait: Duration) -> Result<LockGuard, CallRunError> {
        let mutex = self.handle(name);
        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = name, "Lock acquired");
                Ok(LockGuard { name, _guard: guard })
            }
            Err(_) => {
                warn!(lock = name, wait_ms = wait.as_millis() as u64, "Lock wait timed out");
                Err(CallRunError::ConcurrencyConflict(format!(
                    "{name} is busy, try again shortly"
                )))
            }
        }
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self, name: &'static str) -> Option<LockGuard> {
        self.handle(name)
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard { name, _guard: guard })
    }
}
