//! `basilisk-pipeline`: turns a due message into a published video.
//!
//! Stages run strictly in order and any failure aborts the run:
//!
//! | Stage                | Collaborator          | Error          |
//! |----------------------|-----------------------|----------------|
//! | `SelectingMedia`     | media catalog         | `Composition`  |
//! | `SynthesizingSpeech` | [`SpeechSynthesizer`] | `Synthesis`    |
//! | `ComposingVideo`     | [`VideoTool`]         | `Composition`  |
//! | `Uploading`          | [`SocialPublisher`]   | `Upload`       |
//! | `Posting`            | [`SocialPublisher`]   | `Post`         |
//! | `Finalizing`         | message store         | `Database`     |
//!
//! Only `Finalizing` writes to the store.

pub mod compose;
pub mod error;
pub mod executor;
pub mod media_path;
pub mod publisher;
pub mod scratch;
pub mod speech;
pub mod video;

pub use error::{PipelineError, Stage};
pub use executor::{PipelineExecutor, PipelineSettings, PostOutcome};
pub use media_path::MediaLibrary;
pub use publisher::{SocialPublisher, XClient};
pub use scratch::{ScratchFiles, ScratchSpace};
pub use speech::{ElevenLabsClient, SpeechSynthesizer, VoiceProfile};
pub use video::{FfmpegTool, RenderInput, RenderJob, VideoTool};
