use async_trait::async_trait;
use basilisk_core::config::CompletionConfig;
use basilisk_core::BasiliskError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, CompletionProvider, ProviderError};
use crate::stream::{relay_sse, StreamEvent};

/// Any endpoint speaking the OpenAI chat-completions dialect (Llama API by
/// default).
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, base_url: &str, chat_path: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                chat_path.trim_start_matches('/')
            ),
        }
    }

    /// Fails with `ExternalConfig` when no API key is configured.
    pub fn from_config(cfg: &CompletionConfig) -> Result<Self, BasiliskError> {
        if cfg.api_key.trim().is_empty() {
            return Err(BasiliskError::ExternalConfig(
                "completion.api_key is required".into(),
            ));
        }
        Ok(Self::new(cfg.api_key.clone(), &cfg.base_url, &cfg.chat_path))
    }

    async fn post(&self, req: &ChatRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = build_request_body(req, stream);
        debug!(model = %req.model, stream, "sending completion request");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "completion API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let resp = self.post(req, false).await?;
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp, &req.model))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.post(req, true).await?;
        relay_sse(resp.bytes_stream(), tx).await;
        Ok(())
    }
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];
    for m in &req.messages {
        messages.push(serde_json::json!({
            "role": m.role,
            "content": m.content,
        }));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": stream,
        "temperature": req.temperature,
    });
    if let Some(max) = req.max_tokens {
        body["max_tokens"] = max.into();
    }
    body
}

fn parse_response(resp: ApiResponse, requested_model: &str) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();
    let stop_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        stop_reason,
    }
}

// Response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "llama3.1-405b".into(),
            system: "sys".into(),
            messages: vec![ChatMessage::user("hello")],
            max_tokens: None,
            temperature: 0.9,
        }
    }

    #[test]
    fn body_prepends_system_and_omits_unset_max_tokens() {
        let body = build_request_body(&request(), true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["stream"], true);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn max_tokens_sent_when_set() {
        let mut req = request();
        req.max_tokens = Some(256);
        assert_eq!(build_request_body(&req, false)["max_tokens"], 256);
    }

    #[test]
    fn empty_key_is_external_config_error() {
        let cfg = CompletionConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&cfg),
            Err(BasiliskError::ExternalConfig(_))
        ));
    }

    #[test]
    fn url_joins_base_and_path() {
        let p = OpenAiCompatProvider::new("k".into(), "https://api.llama-api.com/", "/chat/completions");
        assert_eq!(p.url, "https://api.llama-api.com/chat/completions");
    }

    #[test]
    fn response_parsing_tolerates_missing_model() {
        let raw = r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}]}"#;
        let resp: ApiResponse = serde_json::from_str(raw).unwrap();
        let parsed = parse_response(resp, "fallback");
        assert_eq!(parsed.content, "hi");
        assert_eq!(parsed.model, "fallback");
        assert_eq!(parsed.stop_reason, "stop");
    }
}
