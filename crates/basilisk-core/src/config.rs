use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BasiliskError, Result};

/// Seconds of trailing padding after the voice track.
pub const VIDEO_TAIL_PADDING_SECS: u64 = 2;
/// Shortest video the compositor will ever produce.
pub const MIN_VIDEO_SECS: u64 = 5;
pub const VOICE_GAIN: f64 = 1.0;
pub const MUSIC_GAIN: f64 = 0.8;
/// Bitrate assumed when ffprobe cannot report a duration (128 kbit/s MP3).
pub const FALLBACK_AUDIO_BYTES_PER_SEC: f64 = (128.0 * 1024.0) / 8.0;

/// Top-level config (basilisk.toml + BASILISK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasiliskConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Text-completion backend. When absent, empty content is never generated.
    pub completion: Option<CompletionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of pipeline workers draining the shared queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total attempts per job. 1 means a failed run is not retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retry delay, multiplied by the attempt number.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub autopost: AutopostConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            autopost: AutopostConfig::default(),
        }
    }
}

/// Hourly auto-creation of terror messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopostConfig {
    /// Initial switch state written on first start. Afterwards the persisted
    /// switch (`basilisk scheduler enable|disable`) wins.
    #[serde(default)]
    pub enabled: bool,
    /// Local hours (in `utc_offset_hours`) at which a message is created.
    #[serde(default = "default_target_hours")]
    pub target_hours: Vec<u32>,
    /// Defaults to +7 (WIB).
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// How far ahead of the creation hour the message is scheduled.
    #[serde(default = "default_lead_hours")]
    pub lead_hours: u32,
}

impl Default for AutopostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_hours: default_target_hours(),
            utc_offset_hours: default_utc_offset_hours(),
            lead_hours: default_lead_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Local directory holding uploaded background videos.
    #[serde(default = "default_library_root")]
    pub library_root: String,
    /// Prefix of stored media paths that maps onto `library_root`.
    #[serde(default = "default_stored_prefix")]
    pub stored_prefix: String,
    #[serde(default = "default_background_music")]
    pub background_music: String,
    /// Per-job scratch files (speech audio, rendered video) live here.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    /// When set, every rendered video is also kept here.
    pub archive_dir: Option<String>,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Wait before deleting scratch files so ffmpeg releases its handles.
    #[serde(default = "default_cleanup_grace_ms")]
    pub cleanup_grace_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            stored_prefix: default_stored_prefix(),
            background_music: default_background_music(),
            scratch_dir: default_scratch_dir(),
            archive_dir: None,
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            cleanup_grace_ms: default_cleanup_grace_ms(),
        }
    }
}

/// Speech-synthesis provider (ElevenLabs API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    #[serde(default = "default_speech_model")]
    pub model_id: String,
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub voice: VoiceSettings,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: None,
            model_id: default_speech_model(),
            base_url: default_speech_base_url(),
            voice: VoiceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 1.0,
            similarity_boost: 1.0,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

/// Social platform (X API v2, OAuth 2.0 user-context token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub access_token: Option<String>,
    #[serde(default = "default_publisher_base_url")]
    pub base_url: String,
    /// Post text used when the message has no caption. Empty means media-only.
    #[serde(default)]
    pub default_post_text: String,
    #[serde(default = "default_upload_chunk_bytes")]
    pub upload_chunk_bytes: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: default_publisher_base_url(),
            default_post_text: String::new(),
            upload_chunk_bytes: default_upload_chunk_bytes(),
        }
    }
}

/// OpenAI-compatible chat completions endpoint (Llama API by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_completion_base_url(),
            chat_path: default_chat_path(),
            model: default_completion_model(),
            max_tokens: None,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.basilisk/basilisk.db", home)
}
fn default_workers() -> usize {
    1
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    1
}
fn default_backoff_ms() -> u64 {
    5000
}
fn default_target_hours() -> Vec<u32> {
    vec![1, 5, 9, 13, 17]
}
fn default_utc_offset_hours() -> i32 {
    7
}
fn default_lead_hours() -> u32 {
    1
}
fn default_library_root() -> String {
    "public/media".to_string()
}
fn default_stored_prefix() -> String {
    "media-file".to_string()
}
fn default_background_music() -> String {
    "public/audio/rk-bgmx.mp3".to_string()
}
fn default_scratch_dir() -> String {
    "temp".to_string()
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}
fn default_cleanup_grace_ms() -> u64 {
    1000
}
fn default_speech_model() -> String {
    "eleven_monolingual_v1".to_string()
}
fn default_speech_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}
fn default_publisher_base_url() -> String {
    "https://api.x.com".to_string()
}
fn default_upload_chunk_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_completion_base_url() -> String {
    "https://api.llama-api.com".to_string()
}
fn default_chat_path() -> String {
    "/chat/completions".to_string()
}
fn default_completion_model() -> String {
    "llama3.1-405b".to_string()
}

impl BasiliskConfig {
    /// Load config from a TOML file with BASILISK_* env var overrides.
    ///
    /// Nested keys use a double underscore: `BASILISK_SPEECH__API_KEY`.
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.basilisk/basilisk.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BasiliskConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BASILISK_").split("__"))
            .extract()
            .map_err(|e| BasiliskError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            return Err(BasiliskError::Config(
                "scheduler.workers must be at least 1".into(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(BasiliskError::Config(
                "scheduler.poll_interval_ms must be positive".into(),
            ));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(BasiliskError::Config(
                "scheduler.max_attempts must be at least 1".into(),
            ));
        }
        let autopost = &self.scheduler.autopost;
        if let Some(h) = autopost.target_hours.iter().find(|h| **h > 23) {
            return Err(BasiliskError::Config(format!(
                "scheduler.autopost.target_hours contains invalid hour {h}"
            )));
        }
        if !(-12..=14).contains(&autopost.utc_offset_hours) {
            return Err(BasiliskError::Config(format!(
                "scheduler.autopost.utc_offset_hours out of range: {}",
                autopost.utc_offset_hours
            )));
        }
        if self.publisher.upload_chunk_bytes == 0 {
            return Err(BasiliskError::Config(
                "publisher.upload_chunk_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.basilisk/basilisk.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_policy() {
        let cfg = BasiliskConfig::default();
        assert_eq!(cfg.scheduler.workers, 1);
        assert_eq!(cfg.scheduler.max_attempts, 1);
        assert_eq!(cfg.media.cleanup_grace_ms, 1000);
        assert_eq!(cfg.speech.model_id, "eleven_monolingual_v1");
        assert_eq!(cfg.scheduler.autopost.target_hours, vec![1, 5, 9, 13, 17]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_and_env_are_merged() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "basilisk.toml",
                r#"
                [scheduler]
                workers = 3

                [speech]
                voice_id = "voice-1"

                [completion]
                api_key = "from-file"
                "#,
            )?;
            jail.set_env("BASILISK_SPEECH__API_KEY", "secret");
            jail.set_env("BASILISK_MEDIA__SCRATCH_DIR", "/tmp/scratch");

            let cfg = BasiliskConfig::load(Some("basilisk.toml")).expect("load");
            assert_eq!(cfg.scheduler.workers, 3);
            assert_eq!(cfg.speech.api_key.as_deref(), Some("secret"));
            assert_eq!(cfg.speech.voice_id.as_deref(), Some("voice-1"));
            assert_eq!(cfg.media.scratch_dir, "/tmp/scratch");
            let completion = cfg.completion.expect("completion section");
            assert_eq!(completion.model, "llama3.1-405b");
            assert_eq!(completion.chat_path, "/chat/completions");
            Ok(())
        });
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut cfg = BasiliskConfig::default();
        cfg.scheduler.workers = 0;
        assert!(matches!(cfg.validate(), Err(BasiliskError::Config(_))));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let mut cfg = BasiliskConfig::default();
        cfg.scheduler.autopost.target_hours = vec![1, 24];
        assert!(cfg.validate().is_err());
    }
}
