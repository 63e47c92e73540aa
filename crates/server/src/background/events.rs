use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use callrun_dispatch::DispatchEvent;
use callrun_results::IngestionPipeline;

/// Start the result-polling lease whenever a run finishes with accepted calls.
pub async fn run_event_listener(
    mut events: broadcast::Receiver<DispatchEvent>,
    pipeline: Arc<IngestionPipeline>,
) {
    loop {
        match events.recv().await {
            Ok(DispatchEvent::RunFinished(summary)) if summary.ok > 0 => {
                match pipeline.lease().start().await {
                    Ok(_) => info!(run_id = %summary.run_id, "Result polling armed after run"),
                    Err(e) => error!(run_id = %summary.run_id, error = %e, "Failed to start polling lease"),
                }
            }
            Ok(DispatchEvent::BatchFailed { run_id, count, error }) => {
                warn!(run_id = %run_id, count, error = %error, "Batch refunded");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Dispatch event listener lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
