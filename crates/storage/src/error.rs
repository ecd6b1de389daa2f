use comanda_core::{ImportStatus, ReconcileError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid decimal in column {column}: '{value}'")]
    InvalidDecimal { column: &'static str, value: String },
    #[error("Invalid status in column {column}: '{value}'")]
    InvalidStatus { column: &'static str, value: String },
    #[error("Invalid JSON in column {column}: {message}")]
    InvalidJson { column: &'static str, message: String },
    #[error("Import status cannot move from {from} to {to}")]
    InvalidTransition { from: ImportStatus, to: ImportStatus },
}

impl StorageError {
    /// A stored row exists but no longer decodes into the domain type.
    pub fn is_corrupt_data(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidDecimal { .. } | StorageError::InvalidStatus { .. } | StorageError::InvalidJson { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for ReconcileError {
    fn from(e: StorageError) -> Self {
        if e.is_corrupt_data() {
            ReconcileError::CorruptStageData(e.to_string())
        } else {
            ReconcileError::Storage(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_map_to_corrupt_stage_data() {
        let e = StorageError::InvalidStatus { column: "status", value: "approving".into() };
        assert!(matches!(ReconcileError::from(e), ReconcileError::CorruptStageData(_)));
    }

    #[test]
    fn database_failures_map_to_storage() {
        let e = StorageError::Database(sqlx::Error::RowNotFound);
        assert!(matches!(ReconcileError::from(e), ReconcileError::Storage(_)));

        let e = StorageError::InvalidTransition { from: ImportStatus::Approved, to: ImportStatus::Reviewing };
        assert!(!e.is_corrupt_data());
        assert_eq!(e.to_string(), "Import status cannot move from approved to reviewing");
    }
}
