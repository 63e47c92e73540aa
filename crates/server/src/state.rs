use std::sync::Arc;

use callrun_core::{Clock, Config};
use callrun_dispatch::{Cooldowns, DispatchEngine};
use callrun_results::{IngestionPipeline, RecallSweeper};
use callrun_storage::Workbooks;

/// Shared handles for the control surface, the CLI and the background loops.
pub struct AppState {
    pub config: Config,
    pub workbooks: Workbooks,
    pub clock: Arc<dyn Clock>,
    pub engine: Arc<DispatchEngine>,
    pub pipeline: Arc<IngestionPipeline>,
    pub sweeper: Arc<RecallSweeper>,
    pub cooldowns: Cooldowns,
}
