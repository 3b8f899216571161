//! `basilisk-agent`: text completion for message content and streamed
//! conversations.

pub mod generator;
pub mod openai;
pub mod provider;
pub mod stream;

pub use generator::{random_temperature, ContentGenerator};
pub use openai::OpenAiCompatProvider;
pub use provider::{ChatMessage, ChatRequest, ChatResponse, CompletionProvider, ProviderError, Role};
pub use stream::{sse_frame, StreamEvent};
