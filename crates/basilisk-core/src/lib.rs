//! `basilisk-core`: configuration, the shared error taxonomy, and the
//! message / media / prompt domain types used by every other crate.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::BasiliskConfig;
pub use error::{BasiliskError, Result};
pub use types::{
    ChapterMeta, Media, MediaRef, Message, MessageKind, MessageStatus, PromptConfig, PromptKind,
};
