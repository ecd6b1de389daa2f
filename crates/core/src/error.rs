use thiserror::Error;

use super::sales::ImportStatus;

/// Import-level failures surfaced to callers. Line-level outcomes (no match,
/// inferred quantity, price drift) are recorded on the line instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconcileError {
    #[error("Invalid staging input: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Import {import} is {actual}, expected {expected}")]
    Conflict {
        import: i64,
        expected: ImportStatus,
        actual: ImportStatus,
    },
    #[error("Approval commit failed and was rolled back: {0}")]
    CommitFailure(String),
    #[error("Approval did not finish within {0} ms and was rolled back")]
    Timeout(u64),
    #[error("Stored staging data is corrupt: {0}")]
    CorruptStageData(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReconcileError {
    /// Whether retrying the same call may succeed without caller action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::CommitFailure(_) | ReconcileError::Timeout(_))
    }
}
