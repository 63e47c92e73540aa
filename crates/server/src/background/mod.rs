//! Long-running loops spawned by `serve`.

mod dispatch_worker;
mod events;
mod poller;
mod recall;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::state::AppState;

pub(crate) use dispatch_worker::{drain_until_finished, run_dispatch_worker};
pub(crate) use events::run_event_listener;
pub(crate) use poller::run_ingestion_poller;
pub(crate) use recall::run_recall_sweeps;

/// Resume any interrupted run and spawn every background loop.
pub fn spawn_all(state: &Arc<AppState>, ticks: mpsc::Receiver<()>) {
    match state.engine.resume() {
        Ok(Some(run_id)) => info!(run_id = %run_id, "Interrupted dispatch run resumed"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Failed to read run sessions at startup"),
    }

    tokio::spawn(run_event_listener(state.engine.subscribe(), state.pipeline.clone()));
    tokio::spawn(run_dispatch_worker(state.engine.clone(), ticks));
    tokio::spawn(run_ingestion_poller(
        state.pipeline.clone(),
        state.config.schedule.ingest_poll_interval_secs,
    ));
    tokio::spawn(run_recall_sweeps(
        state.sweeper.clone(),
        state.clock.clone(),
        state.config.schedule.recall_sweep_cron.clone(),
    ));
}
