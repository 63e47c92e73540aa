use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use callrun_results::IngestionPipeline;

/// Drain the webhook drop zone on a fixed interval while a polling lease is held.
pub async fn run_ingestion_poller(pipeline: Arc<IngestionPipeline>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Ingestion poller started (interval: {}s)", interval_secs);

    loop {
        interval.tick().await;
        match pipeline.poll().await {
            Ok(None) => debug!("Ingestion poll skipped: no lease"),
            Ok(Some(report)) if report.polling_stopped => info!("{}", report.message),
            Ok(Some(report)) => info!(
                ingested = report.ingested,
                unclassified = report.unclassified,
                "{}",
                report.message
            ),
            Err(e) => warn!(error = %e, "Ingestion poll failed"),
        }
    }
}
