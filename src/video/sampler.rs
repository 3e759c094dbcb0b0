// Frame sampling through an external transcoding tool.
//
// FfmpegSampler probes the video duration with ffprobe, then runs a single
// ffmpeg pass that spreads `frame_count` frames evenly over the timeline,
// scales them to the configured size, and writes them as PNGs into the
// caller's scratch directory. The whole extraction is bounded by a timeout;
// child processes are killed if the call is abandoned.
//
// The sampler never deletes anything: the caller owns the output directory.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ModerationError, Result};
use crate::text::truncate_chars;

/// Default number of frames sampled per video.
pub const DEFAULT_FRAME_COUNT: u32 = 5;

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

/// Target resolution of extracted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = anyhow::Error;

    /// Parse `WxH`, e.g. `320x240`.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow::anyhow!("Frame size {s:?} is not in WxH form"))?;
        let width: u32 = w.trim().parse()?;
        let height: u32 = h.trim().parse()?;
        if width == 0 || height == 0 {
            anyhow::bail!("Frame size {s:?} must be non-zero in both dimensions");
        }
        Ok(Self { width, height })
    }
}

/// Frame file paths produced by one sampling call, in the order the tool
/// emitted them. Consumed once; it cannot be restarted.
#[derive(Debug)]
pub struct FrameSequence {
    frames: std::vec::IntoIter<PathBuf>,
}

impl FrameSequence {
    pub fn new(frames: Vec<PathBuf>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl Iterator for FrameSequence {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        self.frames.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

impl ExactSizeIterator for FrameSequence {}

/// Extracts still frames from a video into a directory the caller owns.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Write up to `frame_count` frames of `video` into `out_dir`, which
    /// must already exist, and return their paths.
    ///
    /// Any tool failure is `ModerationError::TranscodeFailure`.
    async fn sample(&self, video: &Path, frame_count: u32, out_dir: &Path) -> Result<FrameSequence>;
}

/// Settings for the ffmpeg-backed sampler.
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub frame_size: FrameSize,
    /// Upper bound on probe plus extraction.
    pub timeout: Duration,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            frame_size: FrameSize::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Samples frames by shelling out to ffmpeg/ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSampler {
    options: FfmpegOptions,
}

impl FfmpegSampler {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FfmpegOptions {
        &self.options
    }

    /// Video duration in seconds, or None when ffprobe can't tell.
    async fn probe_duration(&self, video: &Path) -> Option<f64> {
        let output = Command::new(&self.options.ffprobe_path)
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(video)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => parse_duration(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                warn!(status = %out.status, video = %video.display(), "ffprobe failed, sampling without duration");
                None
            }
            Err(e) => {
                warn!(error = %e, "ffprobe not available, sampling without duration");
                None
            }
        }
    }

    async fn extract(&self, video: &Path, frame_count: u32, out_dir: &Path) -> Result<FrameSequence> {
        let failure = |reason: String| ModerationError::TranscodeFailure {
            video: video.to_path_buf(),
            reason,
        };

        let duration = self.probe_duration(video).await;
        let filter = frame_filter(duration, frame_count, self.options.frame_size);
        debug!(
            video = %video.display(),
            duration = ?duration,
            filter = %filter,
            "Extracting frames"
        );

        let output = Command::new(&self.options.ffmpeg_path)
            .args(ffmpeg_args(video, out_dir, frame_count, &filter))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    failure(format!(
                        "ffmpeg binary not found at {}",
                        self.options.ffmpeg_path.display()
                    ))
                } else {
                    failure(format!("Failed to run ffmpeg: {e}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                truncate_chars(stderr.trim(), 500)
            )));
        }

        let frames = list_frames(out_dir)
            .await
            .map_err(|e| failure(format!("Failed to list extracted frames: {e}")))?;

        if frames.is_empty() {
            return Err(failure("ffmpeg produced no frames".to_string()));
        }
        if frames.len() < frame_count as usize {
            warn!(
                video = %video.display(),
                requested = frame_count,
                produced = frames.len(),
                "ffmpeg produced fewer frames than requested"
            );
        }

        Ok(FrameSequence::new(frames))
    }
}

#[async_trait]
impl FrameSampler for FfmpegSampler {
    async fn sample(&self, video: &Path, frame_count: u32, out_dir: &Path) -> Result<FrameSequence> {
        if !video.is_file() {
            return Err(ModerationError::TranscodeFailure {
                video: video.to_path_buf(),
                reason: "Video file not found".to_string(),
            });
        }

        match tokio::time::timeout(self.options.timeout, self.extract(video, frame_count, out_dir))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ModerationError::TranscodeFailure {
                video: video.to_path_buf(),
                reason: format!(
                    "Frame extraction timed out after {:.1}s",
                    self.options.timeout.as_secs_f64()
                ),
            }),
        }
    }
}

/// Parse ffprobe's bare duration output. Non-positive or non-numeric
/// values (e.g. `N/A` for live streams) yield None.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Video filter that spreads `frame_count` frames over `duration` seconds.
/// Without a duration, fall back to one frame per second from the start.
fn frame_filter(duration: Option<f64>, frame_count: u32, size: FrameSize) -> String {
    let fps = match duration {
        Some(d) => format!("{}/{:.3}", frame_count, d),
        None => "1".to_string(),
    };
    format!("fps={fps},scale={}:{}", size.width, size.height)
}

fn ffmpeg_args(video: &Path, out_dir: &Path, frame_count: u32, filter: &str) -> Vec<OsString> {
    let pattern = out_dir.join(format!("{FRAME_PREFIX}%03d.{FRAME_EXTENSION}"));
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(video.as_os_str().to_owned());
    for arg in ["-an", "-sn", "-vf", filter, "-frames:v"] {
        args.push(arg.into());
    }
    args.push(frame_count.to_string().into());
    args.push("-y".into());
    args.push(pattern.into_os_string());
    args
}

/// Frame files in `dir`, sorted by name so a single call sees a stable order.
async fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path.extension().is_some_and(|e| e == FRAME_EXTENSION)
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(FRAME_PREFIX));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_parse_and_display() {
        let size: FrameSize = "320x240".parse().unwrap();
        assert_eq!(size, FrameSize::default());
        assert_eq!(size.to_string(), "320x240");
        assert_eq!("640X480".parse::<FrameSize>().unwrap().width, 640);
    }

    #[test]
    fn test_frame_size_rejects_bad_input() {
        for bad in ["320", "x240", "0x240", "320x", "axb"] {
            assert!(bad.parse::<FrameSize>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_frame_filter_spreads_over_duration() {
        let filter = frame_filter(Some(10.0), 5, FrameSize::default());
        assert_eq!(filter, "fps=5/10.000,scale=320:240");
    }

    #[test]
    fn test_frame_filter_without_duration() {
        let size = FrameSize {
            width: 64,
            height: 48,
        };
        assert_eq!(frame_filter(None, 5, size), "fps=1,scale=64:48");
    }

    #[test]
    fn test_ffmpeg_args_cap_frames_and_target_out_dir() {
        let args = ffmpeg_args(
            Path::new("/videos/in.mp4"),
            Path::new("/scratch/s1"),
            5,
            "fps=1,scale=320:240",
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        let frames_at = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[frames_at + 1], "5");
        let input_at = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_at + 1], "/videos/in.mp4");
        assert_eq!(args.last().unwrap(), "/scratch/s1/frame_%03d.png");
    }

    #[test]
    fn test_frame_sequence_is_single_pass() {
        let mut frames = FrameSequence::new(vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.next(), Some(PathBuf::from("a")));
        assert_eq!(frames.next(), Some(PathBuf::from("b")));
        assert_eq!(frames.next(), None);
    }

    #[tokio::test]
    async fn test_list_frames_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_002.png", "frame_001.png", "notes.txt", "frame_003.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let frames = list_frames(dir.path()).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_001.png", "frame_002.png"]);
    }

    #[tokio::test]
    async fn test_missing_video_is_transcode_failure() {
        let out = tempfile::tempdir().unwrap();
        let err = FfmpegSampler::default()
            .sample(Path::new("/nonexistent/clip.mp4"), 5, out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::TranscodeFailure { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transcode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let sampler = FfmpegSampler::new(FfmpegOptions {
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ffprobe_path: dir.path().join("no-such-ffprobe"),
            ..FfmpegOptions::default()
        });
        let err = sampler.sample(&video, 5, &out).await.unwrap_err();
        match err {
            ModerationError::TranscodeFailure { reason, .. } => {
                assert!(reason.contains("not found"), "got: {reason}")
            }
            other => panic!("expected TranscodeFailure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    mod fake_ffmpeg {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        /// Write an executable shell script standing in for ffmpeg and
        /// return a sampler that uses it, plus a video file to feed it.
        fn sampler_with_script(
            dir: &Path,
            body: &str,
            timeout: Duration,
        ) -> (FfmpegSampler, PathBuf, PathBuf) {
            let script = dir.join("fake-ffmpeg");
            std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let video = dir.join("clip.mp4");
            std::fs::write(&video, b"not really a video").unwrap();
            let out = dir.join("out");
            std::fs::create_dir(&out).unwrap();

            let sampler = FfmpegSampler::new(FfmpegOptions {
                ffmpeg_path: script,
                ffprobe_path: dir.join("no-such-ffprobe"),
                timeout,
                ..FfmpegOptions::default()
            });
            (sampler, video, out)
        }

        #[tokio::test]
        async fn test_slow_extraction_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let (sampler, video, out) =
                sampler_with_script(dir.path(), "exec sleep 10", Duration::from_millis(300));

            let started = Instant::now();
            let err = sampler.sample(&video, 5, &out).await.unwrap_err();
            let elapsed = started.elapsed();

            match err {
                ModerationError::TranscodeFailure { reason, .. } => {
                    assert!(reason.contains("timed out"), "got: {reason}")
                }
                other => panic!("expected TranscodeFailure, got {other:?}"),
            }
            assert!(elapsed >= Duration::from_millis(300), "returned after {elapsed:?}");
            assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
        }

        #[tokio::test]
        async fn test_extracted_frames_are_listed_in_order() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"for last; do :; done
out=$(dirname "$last")
for i in 3 1 2; do : > "$out/frame_00$i.png"; done
: > "$out/ffmpeg.log""#;
            let (sampler, video, out) =
                sampler_with_script(dir.path(), body, Duration::from_secs(10));

            let frames: Vec<PathBuf> = sampler.sample(&video, 5, &out).await.unwrap().collect();
            let expected: Vec<PathBuf> = ["frame_001.png", "frame_002.png", "frame_003.png"]
                .iter()
                .map(|name| out.join(name))
                .collect();
            assert_eq!(frames, expected);
        }

        #[tokio::test]
        async fn test_no_frames_written_is_transcode_failure() {
            let dir = tempfile::tempdir().unwrap();
            let (sampler, video, out) =
                sampler_with_script(dir.path(), "exit 0", Duration::from_secs(10));

            let err = sampler.sample(&video, 5, &out).await.unwrap_err();
            match err {
                ModerationError::TranscodeFailure { reason, .. } => {
                    assert!(reason.contains("no frames"), "got: {reason}")
                }
                other => panic!("expected TranscodeFailure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_nonzero_exit_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let (sampler, video, out) = sampler_with_script(
                dir.path(),
                "echo 'moov atom not found' >&2; exit 1",
                Duration::from_secs(10),
            );

            let err = sampler.sample(&video, 5, &out).await.unwrap_err();
            match err {
                ModerationError::TranscodeFailure { reason, .. } => {
                    assert!(reason.contains("moov atom not found"), "got: {reason}")
                }
                other => panic!("expected TranscodeFailure, got {other:?}"),
            }
        }
    }
}
