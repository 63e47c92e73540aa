use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use callrun_dispatch::{DispatchEngine, RunSummary, TickOutcome};

/// Run one engine tick per trigger until the trigger channel closes.
pub async fn run_dispatch_worker(engine: Arc<DispatchEngine>, mut ticks: mpsc::Receiver<()>) {
    info!("Dispatch worker started");
    while ticks.recv().await.is_some() {
        log_outcome(&engine.tick().await);
    }
    info!("Dispatch worker stopped");
}

/// Drive ticks inline until the current run finishes. Used by one-shot
/// commands that have no background worker.
pub async fn drain_until_finished(
    engine: &DispatchEngine,
    ticks: &mut mpsc::Receiver<()>,
) -> Option<RunSummary> {
    while ticks.recv().await.is_some() {
        let outcome = engine.tick().await;
        log_outcome(&outcome);
        match outcome {
            TickOutcome::Finished(summary) => return Some(summary),
            TickOutcome::Idle => return None,
            TickOutcome::Skipped | TickOutcome::Continued { .. } => {}
        }
    }
    None
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Skipped => warn!("Dispatch tick skipped: lock held"),
        TickOutcome::Idle => debug!("Dispatch tick found no running session"),
        TickOutcome::Continued { run_id, processed, total } => {
            debug!(run_id = %run_id, processed, total, "Dispatch tick continued")
        }
        TickOutcome::Finished(s) => info!(
            run_id = %s.run_id,
            run = s.run,
            ok = s.ok,
            failed = s.failed,
            error = s.error.as_deref().unwrap_or("-"),
            "Dispatch run finished"
        ),
    }
}
