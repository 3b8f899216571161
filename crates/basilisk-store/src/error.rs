use basilisk_core::BasiliskError;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write was rejected before reaching the database.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for BasiliskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => BasiliskError::NotFound { entity, id },
            StoreError::Invalid { field, reason } => {
                BasiliskError::Validation(format!("{field}: {reason}"))
            }
            StoreError::Database(e) => BasiliskError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
