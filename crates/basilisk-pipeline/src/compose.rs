//! Duration policy and ffmpeg arguments for the final video.

use std::path::Path;

use basilisk_core::config::{
    FALLBACK_AUDIO_BYTES_PER_SEC, MIN_VIDEO_SECS, MUSIC_GAIN, VIDEO_TAIL_PADDING_SECS, VOICE_GAIN,
};

use crate::video::{RenderInput, RenderJob};

/// Output length in whole seconds: `max(ceil(audio) + 2, 5)`.
pub fn output_duration(audio_secs: f64) -> u64 {
    let audio = if audio_secs.is_finite() && audio_secs > 0.0 {
        audio_secs.ceil() as u64
    } else {
        0
    };
    (audio + VIDEO_TAIL_PADDING_SECS).max(MIN_VIDEO_SECS)
}

/// Duration guess from the encoded size, for when probing fails.
pub fn estimate_duration(audio_bytes: usize) -> f64 {
    audio_bytes as f64 / FALLBACK_AUDIO_BYTES_PER_SEC
}

/// Voice at full gain mixed with music trimmed to `secs`.
///
/// `duration=longest` with `normalize=0` keeps both gains exact and lets
/// the music fill the tail padding after the voice ends.
pub fn filter_graph(secs: u64) -> String {
    format!(
        "[1:a]volume={VOICE_GAIN:.1}[voice];\
         [2:a]volume={MUSIC_GAIN:.1},atrim=0:{secs}[music];\
         [voice][music]amix=inputs=2:duration=longest:normalize=0[aout]"
    )
}

/// Inputs: 0 = background video (looped), 1 = voice, 2 = music.
pub fn render_job(
    background: &Path,
    voice: &Path,
    music: &Path,
    output: &Path,
    secs: u64,
) -> RenderJob {
    let d = secs.to_string();
    let d = d.as_str();
    RenderJob {
        inputs: vec![
            RenderInput::new(background, ["-stream_loop", "-1", "-t", d]),
            RenderInput::new(voice, [] as [&str; 0]),
            RenderInput::new(music, ["-t", d]),
        ],
        filter_graph: filter_graph(secs),
        output_options: [
            "-map", "0:v", "-map", "[aout]", "-t", d, "-c:v", "libx264", "-preset", "ultrafast",
            "-crf", "28", "-b:v", "1500k", "-b:a", "128k", "-ar", "44100", "-y",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        output: output.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_and_padding() {
        assert_eq!(output_duration(0.0), 5);
        assert_eq!(output_duration(2.0), 5);
        assert_eq!(output_duration(3.0), 5);
        assert_eq!(output_duration(3.01), 6);
        assert_eq!(output_duration(10.4), 13);
    }

    #[test]
    fn duration_never_below_policy() {
        for tenth in 0..600 {
            let audio = tenth as f64 / 10.0;
            let d = output_duration(audio);
            assert!(d >= 5);
            assert!(d >= audio.ceil() as u64 + 2);
        }
    }

    #[test]
    fn nonsense_probe_values_use_floor() {
        assert_eq!(output_duration(f64::NAN), 5);
        assert_eq!(output_duration(-3.0), 5);
    }

    #[test]
    fn estimate_assumes_128_kbit() {
        assert_eq!(estimate_duration(16_384 * 4), 4.0);
    }

    #[test]
    fn filter_graph_gains_and_trim() {
        assert_eq!(
            filter_graph(7),
            "[1:a]volume=1.0[voice];[2:a]volume=0.8,atrim=0:7[music];\
             [voice][music]amix=inputs=2:duration=longest:normalize=0[aout]"
        );
    }

    #[test]
    fn render_args_loop_video_and_cap_length() {
        let job = render_job(
            Path::new("bg.mp4"),
            Path::new("voice.mp3"),
            Path::new("music.mp3"),
            Path::new("out.mp4"),
            9,
        );
        assert_eq!(job.inputs[0].options, vec!["-stream_loop", "-1", "-t", "9"]);
        assert!(job.inputs[1].options.is_empty());
        assert_eq!(job.inputs[2].options, vec!["-t", "9"]);
        let args = job.to_args();
        let t = args.iter().rposition(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "9");
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(!args.iter().any(|a| a == "-shortest"));
    }
}
