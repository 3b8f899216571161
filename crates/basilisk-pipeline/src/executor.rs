use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use basilisk_core::config::BasiliskConfig;
use basilisk_core::{BasiliskError, Media, MediaRef, Message, MessageStatus};
use basilisk_scheduler::{JobProcessor, QueuedJob};
use basilisk_store::Store;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::compose::{estimate_duration, output_duration, render_job};
use crate::error::{PipelineError, Result, Stage};
use crate::media_path::MediaLibrary;
use crate::publisher::{SocialPublisher, XClient};
use crate::scratch::{ScratchFiles, ScratchSpace};
use crate::speech::{ElevenLabsClient, SpeechSynthesizer, VoiceProfile};
use crate::video::{FfmpegTool, VideoTool};

const VIDEO_MIME: &str = "video/mp4";

/// Run-independent pipeline inputs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub voice: VoiceProfile,
    pub background_music: PathBuf,
    /// When set, each rendered video is copied here before upload.
    pub archive_dir: Option<PathBuf>,
    /// Post text for messages without a caption. Empty posts media only.
    pub default_post_text: String,
}

/// External ids produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostOutcome {
    pub media_id: String,
    pub post_id: String,
}

/// Turns one due message into a published video.
pub struct PipelineExecutor {
    store: Arc<Store>,
    speech: Arc<dyn SpeechSynthesizer>,
    video: Arc<dyn VideoTool>,
    publisher: Arc<dyn SocialPublisher>,
    library: MediaLibrary,
    scratch: ScratchSpace,
    settings: PipelineSettings,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<Store>,
        speech: Arc<dyn SpeechSynthesizer>,
        video: Arc<dyn VideoTool>,
        publisher: Arc<dyn SocialPublisher>,
        library: MediaLibrary,
        scratch: ScratchSpace,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            speech,
            video,
            publisher,
            library,
            scratch,
            settings,
        }
    }

    /// Production wiring: ElevenLabs, ffmpeg, X.
    ///
    /// Fails with `ExternalConfig` when a required credential is missing.
    pub fn from_config(store: Arc<Store>, config: &BasiliskConfig) -> std::result::Result<Self, BasiliskError> {
        let speech = ElevenLabsClient::from_config(&config.speech)?;
        let publisher = XClient::from_config(&config.publisher)?;
        let settings = PipelineSettings {
            voice: VoiceProfile::from_config(&config.speech)?,
            background_music: PathBuf::from(&config.media.background_music),
            archive_dir: config.media.archive_dir.as_ref().map(PathBuf::from),
            default_post_text: config.publisher.default_post_text.clone(),
        };
        Ok(Self::new(
            store,
            Arc::new(speech),
            Arc::new(FfmpegTool::from_config(&config.media)),
            Arc::new(publisher),
            MediaLibrary::from_config(&config.media),
            ScratchSpace::from_config(&config.media),
            settings,
        ))
    }

    /// Run every stage for `message`. On failure the stage and message id are
    /// logged and the error returned; the stored message is left untouched.
    #[instrument(skip(self, message), fields(message_id = %message.id, kind = %message.kind))]
    pub async fn run(&self, message: &Message) -> std::result::Result<PostOutcome, BasiliskError> {
        let mut stage = Stage::SelectingMedia;
        match self.execute(message, &mut stage).await {
            Ok(outcome) => {
                info!(post_id = %outcome.post_id, media_id = %outcome.media_id, "message posted");
                Ok(outcome)
            }
            Err(e) => {
                error!(stage = %stage, message_id = %message.id, "pipeline failed: {e}");
                Err(e.into())
            }
        }
    }

    async fn execute(&self, message: &Message, stage: &mut Stage) -> Result<PostOutcome> {
        *stage = Stage::SelectingMedia;
        let media = self.select_media(message)?;

        *stage = Stage::SynthesizingSpeech;
        let audio = self.synthesize(message).await?;

        *stage = Stage::ComposingVideo;
        let video = self.compose(message, &media, &audio).await?;

        *stage = Stage::Uploading;
        let media_id = self.publisher.upload_media(video, VIDEO_MIME).await?;

        *stage = Stage::Posting;
        let post_id = self
            .publisher
            .create_post(self.post_text(message), &media_id)
            .await?;

        *stage = Stage::Finalizing;
        let outcome = PostOutcome { media_id, post_id };
        self.finalize(message, &outcome)?;
        Ok(outcome)
    }

    /// The referenced asset, or a uniformly random one of the message's kind.
    fn select_media(&self, message: &Message) -> Result<Media> {
        match message.media_ref {
            MediaRef::Asset(id) => self
                .store
                .media(id)?
                .ok_or(PipelineError::MediaNotFound { id }),
            MediaRef::Random => {
                let candidates = self.store.media_by_kind(message.kind)?;
                candidates
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .ok_or(PipelineError::NoMedia { kind: message.kind })
            }
        }
    }

    async fn synthesize(&self, message: &Message) -> Result<Vec<u8>> {
        let text = message.text();
        if text.is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "message {} has no content",
                message.id
            )));
        }
        let audio = self
            .speech
            .convert(&self.settings.voice.voice_id, text, &self.settings.voice.settings)
            .await?;
        if audio.is_empty() {
            return Err(PipelineError::Synthesis("provider returned no audio".into()));
        }
        Ok(audio)
    }

    /// Writes scratch files, renders, reads the result back, then removes the
    /// scratch files whatever the outcome.
    async fn compose(&self, message: &Message, media: &Media, audio: &[u8]) -> Result<Vec<u8>> {
        let background = self.library.resolve(&media.filepath)?;
        require_file(&background, "background video").await?;
        require_file(&self.settings.background_music, "background music").await?;

        let files = self.scratch.allocate(&message.id).await?;
        let rendered = self.render(&files, &background, audio).await;
        if let Ok(bytes) = &rendered {
            self.archive(message, bytes).await;
        }
        self.scratch.release(&files).await;
        rendered
    }

    async fn render(&self, files: &ScratchFiles, background: &Path, audio: &[u8]) -> Result<Vec<u8>> {
        tokio::fs::write(&files.audio, audio)
            .await
            .map_err(|e| PipelineError::Composition(format!("writing speech audio: {e}")))?;

        let audio_secs = match self.video.probe_duration(&files.audio).await {
            Ok(secs) => secs,
            Err(e) => {
                let estimate = estimate_duration(audio.len());
                warn!(estimate, "probe failed, estimating from size: {e}");
                estimate
            }
        };
        let secs = output_duration(audio_secs);
        info!(audio_secs, video_secs = secs, "composing video");

        let job = render_job(
            background,
            &files.audio,
            &self.settings.background_music,
            &files.video,
            secs,
        );
        self.video.render(&job).await?;

        tokio::fs::read(&files.video)
            .await
            .map_err(|e| PipelineError::Composition(format!("reading rendered video: {e}")))
    }

    /// Best effort; a failed copy does not fail the run.
    async fn archive(&self, message: &Message, bytes: &[u8]) {
        let Some(dir) = &self.settings.archive_dir else {
            return;
        };
        let path = dir.join(format!(
            "tweet_{}_{}.mp4",
            chrono::Utc::now().timestamp_millis(),
            message.id
        ));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match result {
            Ok(()) => info!(path = %path.display(), "rendered video archived"),
            Err(e) => warn!(path = %path.display(), "failed to archive rendered video: {e}"),
        }
    }

    fn post_text<'a>(&'a self, message: &'a Message) -> Option<&'a str> {
        message.caption().or_else(|| {
            let text = self.settings.default_post_text.trim();
            (!text.is_empty()).then_some(text)
        })
    }

    /// Re-read the message and record the external ids. A message deleted
    /// mid-run is only logged; the post already exists. Only a message that
    /// is still Scheduled becomes Posted; any other status is kept and only
    /// the ids are recorded.
    fn finalize(&self, message: &Message, outcome: &PostOutcome) -> Result<()> {
        let Some(mut current) = self.store.message(message.kind, &message.id)? else {
            warn!(message_id = %message.id, post_id = %outcome.post_id, "message deleted before finalizing");
            return Ok(());
        };
        current.external_media_id = Some(outcome.media_id.clone());
        current.external_post_id = Some(outcome.post_id.clone());
        if current.status.can_transition_to(MessageStatus::Posted) {
            current.status = MessageStatus::Posted;
        } else {
            warn!(
                message_id = %message.id,
                status = %current.status,
                post_id = %outcome.post_id,
                "message left Scheduled while running, status kept"
            );
        }
        self.store.update_message(&current)?;
        Ok(())
    }
}

async fn require_file(path: &Path, what: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(PipelineError::Composition(format!(
            "{what} not found at {}",
            path.display()
        ))),
    }
}

#[async_trait]
impl JobProcessor for PipelineExecutor {
    async fn process(&self, job: &QueuedJob) -> std::result::Result<(), BasiliskError> {
        self.run(&job.payload).await.map(|_| ())
    }
}
