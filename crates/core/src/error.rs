use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallRunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Bad or unnormalizable input (row, column, parameter).
    #[error("{0}")]
    Validation(String),

    #[error("UNAUTHORIZED")]
    Authorization,

    #[error("INSUFFICIENT_CREDITS: need {need}, have {have}")]
    InsufficientCredits { need: u64, have: i64 },

    #[error("No eligible leads for Run {run}.")]
    NoEligibleLeads { run: u8 },

    #[error("Dispatch endpoint error: {0}")]
    ExternalDispatch(String),

    /// A lock or single-run slot is held elsewhere; the caller may retry.
    #[error("{0}")]
    ConcurrencyConflict(String),

    #[error("Please wait {remaining_secs}s before trying again.")]
    CoolingDown { remaining_secs: u64 },

    #[error("Outside the call window; opens in {minutes_until_open} min.")]
    OutsideCallWindow { minutes_until_open: i64 },

    #[error("Run aborted: {0}")]
    FatalRun(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl CallRunError {
    /// Whether the same request can succeed later without any change by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallRunError::ConcurrencyConflict(_)
                | CallRunError::CoolingDown { .. }
                | CallRunError::OutsideCallWindow { .. }
        )
    }
}

impl From<serde_json::Error> for CallRunError {
    fn from(e: serde_json::Error) -> Self {
        CallRunError::Serialize(e.to_string())
    }
}

pub type Result<T, E = CallRunError> = std::result::Result<T, E>;
