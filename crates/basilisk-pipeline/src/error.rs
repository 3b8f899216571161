use basilisk_core::{BasiliskError, MessageKind};
use basilisk_store::StoreError;
use thiserror::Error;

/// The ordered steps of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SelectingMedia,
    SynthesizingSpeech,
    ComposingVideo,
    Uploading,
    Posting,
    Finalizing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::SelectingMedia => "selecting_media",
            Stage::SynthesizingSpeech => "synthesizing_speech",
            Stage::ComposingVideo => "composing_video",
            Stage::Uploading => "uploading",
            Stage::Posting => "posting",
            Stage::Finalizing => "finalizing",
        };
        write!(f, "{s}")
    }
}

/// Errors raised inside a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog has no asset for the message's kind.
    #[error("no media available for {kind} messages")]
    NoMedia { kind: MessageKind },

    #[error("media not found: {id}")]
    MediaNotFound { id: i64 },

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// Video tool failure, missing asset or bad media path.
    #[error("Video composition failed: {0}")]
    Composition(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Post creation failed: {0}")]
    Post(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<PipelineError> for BasiliskError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::NoMedia { .. } => BasiliskError::Composition(e.to_string()),
            PipelineError::MediaNotFound { id } => BasiliskError::not_found("media", id.to_string()),
            PipelineError::Synthesis(m) => BasiliskError::Synthesis(m),
            PipelineError::Composition(m) => BasiliskError::Composition(m),
            PipelineError::Upload(m) => BasiliskError::Upload(m),
            PipelineError::Post(m) => BasiliskError::Post(m),
            PipelineError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_catalog_is_a_composition_error() {
        let e: BasiliskError = PipelineError::NoMedia {
            kind: MessageKind::Chapter,
        }
        .into();
        assert_eq!(e.code(), "COMPOSITION_ERROR");
        assert!(e.to_string().contains("chapter"));
    }
}
