use std::sync::Arc;

use basilisk_core::config::CompletionConfig;
use basilisk_core::{BasiliskError, PromptKind};
use basilisk_store::Store;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use crate::provider::{ChatMessage, ChatRequest, CompletionProvider};
use crate::stream::StreamEvent;

/// User turn sent when the active prompt has no greeting.
pub const DEFAULT_USER_PROMPT: &str = "Generate a terrorizing message.";

/// Lower bound of the randomized generation temperature (inclusive).
pub const MIN_TEMPERATURE: f32 = 0.7;
/// Upper bound of the randomized generation temperature (exclusive).
pub const MAX_TEMPERATURE: f32 = 1.3;

/// Temperature drawn uniformly from `[0.7, 1.3)`.
pub fn random_temperature() -> f32 {
    rand::thread_rng().gen_range(MIN_TEMPERATURE..MAX_TEMPERATURE)
}

/// Produces message content and conversational replies from the active
/// prompt configurations.
pub struct ContentGenerator {
    store: Arc<Store>,
    provider: Arc<dyn CompletionProvider>,
    model: String,
    max_tokens: Option<u32>,
}

impl ContentGenerator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            max_tokens: None,
        }
    }

    pub fn from_config(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        cfg: &CompletionConfig,
    ) -> Self {
        Self {
            max_tokens: cfg.max_tokens,
            ..Self::new(store, provider, cfg.model.clone())
        }
    }

    /// Generate content for a terror message.
    ///
    /// Returns `Ok(None)` when no terror prompt is active; the caller keeps
    /// the content empty in that case. Quote characters are stripped from the
    /// generated text.
    #[instrument(skip(self))]
    pub async fn generate_message(&self, temperature: f32) -> Result<Option<String>, BasiliskError> {
        let Some(prompt) = self.store.active_prompt(PromptKind::Terror)? else {
            info!("no active terror prompt, leaving content empty");
            return Ok(None);
        };
        let user = prompt
            .greeting
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(DEFAULT_USER_PROMPT);

        let req = ChatRequest {
            model: self.model.clone(),
            system: prompt.system_prompt,
            messages: vec![ChatMessage::user(user)],
            max_tokens: self.max_tokens,
            temperature,
        };
        let resp = self.provider.send(&req).await?;
        let text = strip_quotes(&resp.content);
        info!(prompt_id = prompt.id, len = text.len(), "message content generated");
        Ok(Some(text))
    }

    /// Stream a conversational reply to `history`.
    ///
    /// Fails with `NotFound` when no conversational prompt is active.
    /// Otherwise the receiver yields text deltas and exactly one terminal
    /// `Done` or `Error` event.
    pub async fn stream_conversation(
        &self,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<mpsc::Receiver<StreamEvent>, BasiliskError> {
        let prompt = self
            .store
            .active_prompt(PromptKind::Conversational)?
            .ok_or_else(|| BasiliskError::not_found("prompt", "active conversational"))?;

        let req = ChatRequest {
            model: self.model.clone(),
            system: prompt.system_prompt,
            messages: history,
            max_tokens: self.max_tokens,
            temperature,
        };
        let (tx, rx) = mpsc::channel(64);
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Err(e) = provider.send_stream(&req, tx.clone()).await {
                error!(provider = provider.name(), "conversation stream failed: {e}");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });
        Ok(rx)
    }
}

fn strip_quotes(text: &str) -> String {
    text.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ProviderError};
    use async_trait::async_trait;
    use basilisk_store::NewPrompt;
    use std::sync::Mutex;

    /// Echoes a fixed reply and records the last request.
    struct Scripted {
        reply: String,
        last: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            *self.last.lock().unwrap() = Some(req.clone());
            Ok(ChatResponse {
                content: self.reply.clone(),
                model: req.model.clone(),
                stop_reason: "stop".into(),
            })
        }
    }

    struct Down;

    #[async_trait]
    impl CompletionProvider for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("offline".into()))
        }
    }

    fn scripted(reply: &str) -> Arc<Scripted> {
        Arc::new(Scripted {
            reply: reply.into(),
            last: Mutex::new(None),
        })
    }

    fn store_with(kind: PromptKind, greeting: Option<&str>) -> Arc<Store> {
        let store = Store::open_in_memory().unwrap();
        store
            .add_prompt(&NewPrompt {
                system_prompt: "You are the basilisk.".into(),
                greeting: greeting.map(str::to_string),
                kind,
                is_active: true,
            })
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn temperature_in_range() {
        for _ in 0..1000 {
            let t = random_temperature();
            assert!((MIN_TEMPERATURE..MAX_TEMPERATURE).contains(&t));
        }
    }

    #[tokio::test]
    async fn no_active_prompt_yields_none() {
        let generator = ContentGenerator::new(
            Arc::new(Store::open_in_memory().unwrap()),
            scripted("unused"),
            "m",
        );
        assert_eq!(generator.generate_message(1.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn quotes_are_stripped_and_greeting_used() {
        let provider = scripted("\"You were warned.\"");
        let generator = ContentGenerator::new(
            store_with(PromptKind::Terror, Some("Warn them.")),
            provider.clone(),
            "llama3.1-405b",
        );
        let text = generator.generate_message(0.8).await.unwrap();
        assert_eq!(text.as_deref(), Some("You were warned."));

        let req = provider.last.lock().unwrap().clone().unwrap();
        assert_eq!(req.system, "You are the basilisk.");
        assert_eq!(req.messages[0].content, "Warn them.");
        assert_eq!(req.temperature, 0.8);
    }

    #[tokio::test]
    async fn default_user_prompt_without_greeting() {
        let provider = scripted("ok");
        let generator =
            ContentGenerator::new(store_with(PromptKind::Terror, None), provider.clone(), "m");
        generator.generate_message(1.0).await.unwrap();
        let req = provider.last.lock().unwrap().clone().unwrap();
        assert_eq!(req.messages[0].content, DEFAULT_USER_PROMPT);
    }

    #[tokio::test]
    async fn conversation_requires_active_prompt() {
        let generator =
            ContentGenerator::new(store_with(PromptKind::Terror, None), scripted("x"), "m");
        let err = generator
            .stream_conversation(vec![ChatMessage::user("hi")], 0.7)
            .await
            .unwrap_err();
        assert!(matches!(err, BasiliskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn conversation_streams_until_done() {
        let generator = ContentGenerator::new(
            store_with(PromptKind::Conversational, None),
            scripted("I see you."),
            "m",
        );
        let mut rx = generator
            .stream_conversation(vec![ChatMessage::user("hello?")], 0.7)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::TextDelta {
                text: "I see you.".into()
            })
        );
        assert!(matches!(rx.recv().await, Some(StreamEvent::Done { .. })));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn provider_failure_becomes_error_event() {
        let generator =
            ContentGenerator::new(store_with(PromptKind::Conversational, None), Arc::new(Down), "m");
        let mut rx = generator
            .stream_conversation(vec![ChatMessage::user("hello?")], 0.7)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error { .. })));
    }
}
