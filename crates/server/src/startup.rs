//! Shared state initialization.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use callrun_core::{CallWindow, Clock, Config, SystemClock};
use callrun_dispatch::{
    Cooldowns, CreditLedger, DispatchEndpoint, DispatchEngine, EngineParts, HttpDispatchEndpoint,
    ProcessLocks, SessionStore, UnconfiguredEndpoint,
};
use callrun_results::{IngestionPipeline, RecallSweeper};
use callrun_storage::Workbooks;

use crate::state::AppState;

/// Open the configured workbooks and session file and wire the services.
///
/// The returned receiver carries dispatch ticks and must be handed to the
/// dispatch worker (or drained inline by one-shot commands).
pub fn build_app_state(config: &Config) -> anyhow::Result<(Arc<AppState>, mpsc::Receiver<()>)> {
    let workbooks = Workbooks::from_config(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.schedule.utc_offset_minutes));

    let endpoint: Arc<dyn DispatchEndpoint> = match &config.dispatch.api_key {
        Some(key) => {
            info!(url = %config.dispatch.url, "Dispatch endpoint ready");
            Arc::new(HttpDispatchEndpoint::new(config.dispatch.url.clone(), key.clone()))
        }
        None => {
            warn!("DISPATCH_API_KEY not set; send runs will fail every batch");
            Arc::new(UnconfiguredEndpoint)
        }
    };

    let sessions = Arc::new(SessionStore::open(config.storage.sessions_path())?);
    info!(path = %config.storage.sessions_path().display(), "Session store opened");

    Ok(assemble(config.clone(), workbooks, clock, endpoint, sessions))
}

/// Wire the services over already-opened storage.
pub fn assemble(
    config: Config,
    workbooks: Workbooks,
    clock: Arc<dyn Clock>,
    endpoint: Arc<dyn DispatchEndpoint>,
    sessions: Arc<SessionStore>,
) -> (Arc<AppState>, mpsc::Receiver<()>) {
    let locks = Arc::new(ProcessLocks::new());
    let ledger = CreditLedger::new(workbooks.outbound.clone(), locks.clone(), clock.clone());
    let cooldowns = Cooldowns::new(
        workbooks.outbound.clone(),
        clock.clone(),
        config.portal.send_cooldown_minutes,
        config.portal.ingest_cooldown_minutes,
    );
    let call_window = config
        .schedule
        .enforce_call_window
        .then(|| CallWindow::new(config.schedule.call_start_hour, config.schedule.call_end_hour));

    let (engine, ticks) = DispatchEngine::new(EngineParts {
        config: config.dispatch.clone(),
        call_window,
        outbound: workbooks.outbound.clone(),
        ledger,
        cooldowns: cooldowns.clone(),
        sessions,
        endpoint,
        locks: locks.clone(),
        clock: clock.clone(),
    });

    let pipeline = IngestionPipeline::new(
        &workbooks,
        clock.clone(),
        locks.clone(),
        config.schedule.ingest_lease_minutes,
    );
    let sweeper = RecallSweeper::new(workbooks.archive.clone(), workbooks.outbound.clone(), clock.clone());

    let state = Arc::new(AppState {
        config,
        workbooks,
        clock,
        engine: Arc::new(engine),
        pipeline: Arc::new(pipeline),
        sweeper: Arc::new(sweeper),
        cooldowns,
    });
    (state, ticks)
}
