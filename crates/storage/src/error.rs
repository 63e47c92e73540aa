use thiserror::Error;

use callrun_core::CallRunError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tab not found: {0}")]
    TabNotFound(String),

    #[error("column not found: {column} (tab {tab})")]
    ColumnNotFound { tab: String, column: String },

    /// The pending object changed between download and rotation.
    #[error("outcome batch changed during rotation: {0}")]
    Conflict(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for CallRunError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) => CallRunError::ConcurrencyConflict(msg),
            StorageError::ColumnNotFound { tab, column } => {
                CallRunError::Validation(format!("missing column {column} in {tab}"))
            }
            other => CallRunError::Storage(other.to_string()),
        }
    }
}
