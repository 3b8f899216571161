use async_trait::async_trait;
use basilisk_core::config::{SpeechConfig, VoiceSettings};
use basilisk_core::BasiliskError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice; returns encoded audio (MP3).
    async fn convert(&self, voice_id: &str, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>>;
}

/// Which voice the pipeline speaks with.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub settings: VoiceSettings,
}

impl VoiceProfile {
    /// Fails with `ExternalConfig` when `speech.voice_id` is missing.
    pub fn from_config(cfg: &SpeechConfig) -> std::result::Result<Self, BasiliskError> {
        let voice_id = cfg
            .voice_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| BasiliskError::ExternalConfig("speech.voice_id is required".into()))?;
        Ok(Self {
            voice_id,
            settings: cfg.voice.clone(),
        })
    }
}

/// ElevenLabs text-to-speech REST client.
pub struct ElevenLabsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl ElevenLabsClient {
    /// Fails with `ExternalConfig` when `speech.api_key` is missing.
    pub fn from_config(cfg: &SpeechConfig) -> std::result::Result<Self, BasiliskError> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BasiliskError::ExternalConfig("speech.api_key is required".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model_id: cfg.model_id.clone(),
        })
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn convert(&self, voice_id: &str, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>> {
        let url = format!("{}/v1/text-to-speech/{voice_id}", self.base_url);
        debug!(voice_id, chars = text.len(), "requesting speech");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&TtsRequest {
                text,
                model_id: &self.model_id,
                voice_settings: settings,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "speech API error");
            return Err(PipelineError::Synthesis(format!(
                "speech API returned {status}: {body}"
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let settings = VoiceSettings::default();
        let body = serde_json::to_value(TtsRequest {
            text: "hello",
            model_id: "eleven_monolingual_v1",
            voice_settings: &settings,
        })
        .unwrap();
        assert_eq!(body["model_id"], "eleven_monolingual_v1");
        assert_eq!(body["voice_settings"]["stability"], 1.0);
        assert_eq!(body["voice_settings"]["similarity_boost"], 1.0);
        assert_eq!(body["voice_settings"]["style"], 0.0);
        assert_eq!(body["voice_settings"]["use_speaker_boost"], true);
    }

    #[test]
    fn missing_credentials_are_external_config_errors() {
        let cfg = SpeechConfig::default();
        assert!(matches!(
            ElevenLabsClient::from_config(&cfg),
            Err(BasiliskError::ExternalConfig(_))
        ));
        assert!(matches!(
            VoiceProfile::from_config(&cfg),
            Err(BasiliskError::ExternalConfig(_))
        ));

        let cfg = SpeechConfig {
            api_key: Some("k".into()),
            voice_id: Some("v".into()),
            ..Default::default()
        };
        assert!(ElevenLabsClient::from_config(&cfg).is_ok());
        assert_eq!(VoiceProfile::from_config(&cfg).unwrap().voice_id, "v");
    }
}
