use std::path::{Path, PathBuf};
use std::time::Duration;

use basilisk_core::config::MediaConfig;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Per-run temporary files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchFiles {
    pub audio: PathBuf,
    pub video: PathBuf,
}

/// Directory holding per-run scratch files, plus the grace delay observed
/// before they are removed.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
    grace: Duration,
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            dir: dir.into(),
            grace,
        }
    }

    pub fn from_config(cfg: &MediaConfig) -> Self {
        Self::new(&cfg.scratch_dir, Duration::from_millis(cfg.cleanup_grace_ms))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the directory exists and name this run's files
    /// `<id>_<millis>_audio.mp3` / `<id>_<millis>_video.mp4`.
    pub async fn allocate(&self, message_id: &str) -> Result<ScratchFiles> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::Composition(format!("scratch dir: {e}")))?;

        let stem = format!(
            "{}_{}",
            file_safe(message_id),
            chrono::Utc::now().timestamp_millis()
        );
        Ok(ScratchFiles {
            audio: self.dir.join(format!("{stem}_audio.mp3")),
            video: self.dir.join(format!("{stem}_video.mp4")),
        })
    }

    /// Wait out the grace delay, then delete both files. Missing files are
    /// fine; other errors are logged.
    pub async fn release(&self, files: &ScratchFiles) {
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        for path in [&files.audio, &files.video] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "scratch file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "failed to remove scratch file: {e}"),
            }
        }
    }
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_then_release_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let space = ScratchSpace::new(tmp.path().join("scratch"), Duration::ZERO);

        let files = space.allocate("0192-abc").await.unwrap();
        let audio_name = files.audio.file_name().unwrap().to_string_lossy().to_string();
        assert!(audio_name.starts_with("0192-abc_"));
        assert!(audio_name.ends_with("_audio.mp3"));
        assert!(files.video.to_string_lossy().ends_with("_video.mp4"));

        tokio::fs::write(&files.audio, b"mp3").await.unwrap();
        // video never written: release must not care
        space.release(&files).await;

        let left = std::fs::read_dir(space.dir()).unwrap().count();
        assert_eq!(left, 0);
    }

    #[test]
    fn ids_are_made_file_safe() {
        assert_eq!(file_safe("a/b\\c d"), "a_b_c_d");
        assert_eq!(file_safe("0192f0e1-7c3a"), "0192f0e1-7c3a");
    }
}
