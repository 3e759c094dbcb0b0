use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::vision::onnx::{ClassifierOptions, PixelLayout};
use crate::vision::policy::{ExplicitContentPolicy, DEFAULT_CATEGORY, DEFAULT_THRESHOLD};
use crate::video::sampler::{FfmpegOptions, FrameSize, DEFAULT_FRAME_COUNT};

/// Central configuration loaded from environment variables.
///
/// Every setting has a default matching the reference moderation policy
/// (0.70 threshold, 5 frames at 320x240). A `.env` file is loaded
/// automatically by `Config::load` via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing `model.onnx` and optional `labels.json`
    pub model_dir: PathBuf,
    /// Base URL the model files can be downloaded from
    pub model_url: Option<String>,
    pub model_input_size: u32,
    pub model_layout: PixelLayout,
    pub model_load_timeout: Duration,
    /// Category name fragment treated as explicit content
    pub flag_category: String,
    /// Probability the explicit category must strictly exceed to flag
    pub flag_threshold: f64,
    pub frame_count: u32,
    pub frame_size: FrameSize,
    /// Frames of one video classified in parallel (1 = sequential)
    pub frame_concurrency: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub transcode_timeout: Duration,
    /// Parent directory for per-call scratch sessions
    pub scratch_dir: PathBuf,
    /// Extra profanity words, one per line
    pub wordlist_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let classifier = ClassifierOptions::default();
        let ffmpeg = FfmpegOptions::default();
        Self {
            model_dir: crate::vision::download::default_model_dir(),
            model_url: None,
            model_input_size: classifier.input_size,
            model_layout: classifier.layout,
            model_load_timeout: Duration::from_secs(120),
            flag_category: DEFAULT_CATEGORY.to_string(),
            flag_threshold: DEFAULT_THRESHOLD,
            frame_count: DEFAULT_FRAME_COUNT,
            frame_size: ffmpeg.frame_size,
            frame_concurrency: 1,
            ffmpeg_path: ffmpeg.ffmpeg_path,
            ffprobe_path: ffmpeg.ffprobe_path,
            transcode_timeout: ffmpeg.timeout,
            scratch_dir: env::temp_dir(),
            wordlist_path: None,
        }
    }
}

impl Config {
    /// Load configuration from `.env` (if present) and environment variables.
    pub fn load() -> Result<Self> {
        // Missing .env is fine; real deployments set variables directly
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys take
    /// defaults; set but invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            model_dir: get("VIGIL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            model_url: get("VIGIL_MODEL_URL"),
            model_input_size: parse_or(&get, "VIGIL_MODEL_INPUT_SIZE", defaults.model_input_size)?,
            model_layout: parse_or(&get, "VIGIL_MODEL_LAYOUT", defaults.model_layout)?,
            model_load_timeout: secs_or(
                &get,
                "VIGIL_MODEL_LOAD_TIMEOUT_SECS",
                defaults.model_load_timeout,
            )?,
            flag_category: get("VIGIL_FLAG_CATEGORY").unwrap_or(defaults.flag_category),
            flag_threshold: parse_or(&get, "VIGIL_FLAG_THRESHOLD", defaults.flag_threshold)?,
            frame_count: parse_or(&get, "VIGIL_FRAME_COUNT", defaults.frame_count)?,
            frame_size: parse_or(&get, "VIGIL_FRAME_SIZE", defaults.frame_size)?,
            frame_concurrency: parse_or(
                &get,
                "VIGIL_FRAME_CONCURRENCY",
                defaults.frame_concurrency,
            )?,
            ffmpeg_path: get("VIGIL_FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: get("VIGIL_FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            transcode_timeout: secs_or(
                &get,
                "VIGIL_TRANSCODE_TIMEOUT_SECS",
                defaults.transcode_timeout,
            )?,
            scratch_dir: get("VIGIL_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            wordlist_path: get("VIGIL_WORDLIST_PATH").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline can't run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.flag_threshold) {
            anyhow::bail!(
                "VIGIL_FLAG_THRESHOLD must be between 0 and 1, got {}",
                self.flag_threshold
            );
        }
        if self.flag_category.trim().is_empty() {
            anyhow::bail!("VIGIL_FLAG_CATEGORY must not be empty");
        }
        if self.frame_count == 0 {
            anyhow::bail!("VIGIL_FRAME_COUNT must be at least 1");
        }
        if self.frame_concurrency == 0 {
            anyhow::bail!("VIGIL_FRAME_CONCURRENCY must be at least 1");
        }
        if self.model_input_size == 0 {
            anyhow::bail!("VIGIL_MODEL_INPUT_SIZE must be at least 1");
        }
        Ok(())
    }

    /// Check that a model download is possible.
    pub fn require_model_url(&self) -> Result<&str> {
        self.model_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "VIGIL_MODEL_URL not set. Point it at a directory serving model.onnx \
                 (and optionally labels.json)."
            )
        })
    }

    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            input_size: self.model_input_size,
            layout: self.model_layout,
        }
    }

    pub fn policy(&self) -> ExplicitContentPolicy {
        ExplicitContentPolicy {
            category: self.flag_category.clone(),
            threshold: self.flag_threshold,
        }
    }

    pub fn ffmpeg_options(&self) -> FfmpegOptions {
        FfmpegOptions {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            frame_size: self.frame_size,
            timeout: self.transcode_timeout,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: f64 = parse_or(get, key, default.as_secs_f64())?;
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("{key} must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("{key} is out of range"))
}
