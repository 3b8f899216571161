use thiserror::Error;

/// Shared error taxonomy surfaced by the lifecycle layer and the pipeline.
///
/// Crate-local errors (`StoreError`, `SchedulerError`, `PipelineError`)
/// convert into this type so callers see a single enum.
#[derive(Debug, Error)]
pub enum BasiliskError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Scheduling failed: {0}")]
    Scheduling(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Video composition failed: {0}")]
    Composition(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Post creation failed: {0}")]
    Post(String),

    /// A required credential or endpoint is missing. Fatal at construction time.
    #[error("Missing external configuration: {0}")]
    ExternalConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BasiliskError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Short error code string used in logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            BasiliskError::Validation(_) => "VALIDATION_ERROR",
            BasiliskError::NotFound { .. } => "NOT_FOUND",
            BasiliskError::Scheduling(_) => "SCHEDULING_ERROR",
            BasiliskError::Synthesis(_) => "SYNTHESIS_ERROR",
            BasiliskError::Composition(_) => "COMPOSITION_ERROR",
            BasiliskError::Upload(_) => "UPLOAD_ERROR",
            BasiliskError::Post(_) => "POST_ERROR",
            BasiliskError::ExternalConfig(_) => "EXTERNAL_CONFIG_ERROR",
            BasiliskError::Config(_) => "CONFIG_ERROR",
            BasiliskError::Database(_) => "DATABASE_ERROR",
            BasiliskError::Serialization(_) => "SERIALIZATION_ERROR",
            BasiliskError::Io(_) => "IO_ERROR",
            BasiliskError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BasiliskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            BasiliskError::Scheduling("past".into()).code(),
            "SCHEDULING_ERROR"
        );
        assert_eq!(
            BasiliskError::not_found("message", "m-1").code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn not_found_renders_entity_and_id() {
        let e = BasiliskError::not_found("media", "42");
        assert_eq!(e.to_string(), "media not found: 42");
    }
}
