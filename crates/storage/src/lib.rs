pub mod backend;
pub mod blocks;
pub mod error;
pub mod inbox;
pub mod json_file;
pub mod memory;
pub mod settings;
pub mod table;

use std::sync::Arc;

use tracing::info;

pub use backend::{LocalBackend, S3Backend, WebhookBackend};
pub use blocks::{contiguous_runs, fill_column, write_column_values};
pub use error::StorageError;
pub use inbox::{OutcomeInbox, PendingBatch};
pub use json_file::JsonFileTableStore;
pub use memory::MemoryTableStore;
pub use settings::Settings;
pub use table::{Table, TableStore, APPEND_CHUNK_ROWS};

/// The three workbooks plus the webhook drop zone.
#[derive(Clone)]
pub struct Workbooks {
    /// Lead tabs, credit settings, ledger, sent index, cooldowns.
    pub outbound: Arc<dyn TableStore>,
    /// One tab per outcome bucket.
    pub results: Arc<dyn TableStore>,
    /// Monthly archive tabs.
    pub archive: Arc<dyn TableStore>,
    pub inbox: OutcomeInbox,
}

impl Workbooks {
    /// File-backed workbooks under the configured data dir.
    pub fn from_config(config: &callrun_core::Config) -> Result<Self, StorageError> {
        let storage = &config.storage;
        let outbound = JsonFileTableStore::new(storage.outbound_dir())?;
        let results = JsonFileTableStore::new(storage.results_dir())?;
        let archive = JsonFileTableStore::new(storage.archive_dir())?;
        let backend = WebhookBackend::from_config(&config.webhook)?;
        info!(
            data_dir = %storage.data_dir.display(),
            remote_inbox = backend.is_remote(),
            "Workbooks opened"
        );
        Ok(Self {
            outbound: Arc::new(outbound),
            results: Arc::new(results),
            archive: Arc::new(archive),
            inbox: OutcomeInbox::new(&backend, config.webhook.results_path.clone()),
        })
    }

    /// Everything in memory; the inbox uses an in-memory object store.
    pub fn in_memory() -> Self {
        let backend = WebhookBackend::in_memory();
        Self {
            outbound: Arc::new(MemoryTableStore::new()),
            results: Arc::new(MemoryTableStore::new()),
            archive: Arc::new(MemoryTableStore::new()),
            inbox: OutcomeInbox::new(&backend, "raw_leads/inbound_webhook.csv"),
        }
    }
}
