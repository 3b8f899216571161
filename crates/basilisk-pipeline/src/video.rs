use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use basilisk_core::config::MediaConfig;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInput {
    pub path: PathBuf,
    pub options: Vec<String>,
}

impl RenderInput {
    pub fn new<I, S>(path: &Path, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.to_path_buf(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// A complete render: inputs, one filter graph, output options and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub inputs: Vec<RenderInput>,
    pub filter_graph: String,
    pub output_options: Vec<String>,
    pub output: PathBuf,
}

impl RenderJob {
    /// ffmpeg argument vector (without the program name).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string()];
        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".into());
            args.push(input.path.to_string_lossy().into_owned());
        }
        args.push("-filter_complex".into());
        args.push(self.filter_graph.clone());
        args.extend(self.output_options.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// External audio/video tool.
#[async_trait]
pub trait VideoTool: Send + Sync {
    /// Media duration in seconds.
    async fn probe_duration(&self, file: &Path) -> Result<f64>;

    /// Run `job`, producing `job.output`.
    async fn render(&self, job: &RenderJob) -> Result<()>;
}

/// ffmpeg / ffprobe via `tokio::process`.
pub struct FfmpegTool {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(cfg: &MediaConfig) -> Self {
        Self::new(resolve_binary(&cfg.ffmpeg_path), resolve_binary(&cfg.ffprobe_path))
    }
}

/// Bare program names are looked up on `PATH`; anything with a path
/// separator is used as given.
fn resolve_binary(configured: &str) -> String {
    if configured.contains(std::path::MAIN_SEPARATOR) || configured.contains('/') {
        return configured.to_string();
    }
    which::which(configured).map_or_else(
        |_| configured.to_string(),
        |p| p.to_string_lossy().to_string(),
    )
}

#[async_trait]
impl VideoTool for FfmpegTool {
    async fn probe_duration(&self, file: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(file)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Composition(format!("ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(PipelineError::Composition(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }
        parse_probe_duration(&output.stdout)
    }

    async fn render(&self, job: &RenderJob) -> Result<()> {
        let args = job.to_args();
        debug!(command = %format!("{} {}", self.ffmpeg, args.join(" ")), "ffmpeg start");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Composition(format!("ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            warn!(status = %output.status, stderr = %tail, "ffmpeg failed");
            return Err(PipelineError::Composition(format!(
                "ffmpeg exited with {}: {tail}",
                output.status
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &[u8]) -> Result<f64> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| PipelineError::Composition(format!("ffprobe output: {e}")))?;
    probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| PipelineError::Composition("ffprobe reported no duration".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_duration_parses_format_block() {
        let raw = br#"{"format":{"filename":"a.mp3","duration":"3.474286"}}"#;
        assert!((parse_probe_duration(raw).unwrap() - 3.474286).abs() < 1e-9);
    }

    #[test]
    fn probe_without_duration_is_an_error() {
        assert!(parse_probe_duration(br#"{"format":{}}"#).is_err());
        assert!(parse_probe_duration(b"{}").is_err());
        assert!(parse_probe_duration(b"not json").is_err());
    }

    #[test]
    fn args_order_inputs_then_filter_then_output() {
        let job = RenderJob {
            inputs: vec![
                RenderInput::new(Path::new("a.mp4"), ["-stream_loop", "-1"]),
                RenderInput::new(Path::new("b.mp3"), [] as [&str; 0]),
            ],
            filter_graph: "[1:a]anull[aout]".into(),
            output_options: vec!["-y".into()],
            output: PathBuf::from("out.mp4"),
        };
        assert_eq!(
            job.to_args(),
            vec![
                "-hide_banner",
                "-stream_loop",
                "-1",
                "-i",
                "a.mp4",
                "-i",
                "b.mp3",
                "-filter_complex",
                "[1:a]anull[aout]",
                "-y",
                "out.mp4"
            ]
        );
    }

    #[test]
    fn explicit_paths_are_not_resolved() {
        assert_eq!(resolve_binary("/opt/ffmpeg/bin/ffmpeg"), "/opt/ffmpeg/bin/ffmpeg");
    }
}
