// Moderation orchestration: dispatch by modality, aggregate frame verdicts,
// and own the scratch space used for video.
//
// Video flow:
// 1. Create a fresh ScratchSession for this call
// 2. Sample frames into it with the configured FrameSampler
// 3. Classify frames in batches of `frame_concurrency`, stopping after the
//    first batch that contains a flagged frame
// 4. Aggregate: flagged if any frame is, score is the max frame score
// 5. Remove the session on every exit path, then surface any error wrapped
//    in ModerationFailed

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ModerationError, Result};
use crate::registry::ModelRegistry;
use crate::text::TextModerator;
use crate::video::sampler::{FfmpegSampler, FrameSampler, DEFAULT_FRAME_COUNT};
use crate::video::scratch::ScratchSession;
use crate::vision::onnx::OnnxImageClassifier;
use crate::vision::policy::{assess_image, moderate_image, ExplicitContentPolicy, ImageAssessment};
use crate::vision::traits::{ClassificationResult, ImageSource, ModelHandle};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];

/// One payload to moderate.
#[derive(Debug, Clone)]
pub enum ModerationRequest {
    Text(String),
    Image(ImageSource),
    Video(PathBuf),
}

impl ModerationRequest {
    /// Pick Image or Video from the file extension. Returns None for
    /// anything that is neither.
    pub fn from_media_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image(ImageSource::Path(path)))
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video(path))
        } else {
            None
        }
    }

    pub fn source(&self) -> ContentSource {
        match self {
            Self::Text(_) => ContentSource::Text,
            Self::Image(_) => ContentSource::Image,
            Self::Video(_) => ContentSource::Video,
        }
    }
}

/// Modality a verdict was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Text,
    Image,
    Video,
}

/// Classification outcome for one image or one sampled video frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameVerdict {
    /// Position in the sampled sequence (0 for a single image).
    pub index: usize,
    pub flagged: bool,
    pub score: f64,
    pub categories: ClassificationResult,
}

impl FrameVerdict {
    fn from_assessment(index: usize, assessment: ImageAssessment) -> Self {
        Self {
            index,
            flagged: assessment.flagged,
            score: assessment.score,
            categories: assessment.categories,
        }
    }
}

/// Result of moderating one request. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationVerdict {
    flagged: bool,
    score: f64,
    source: ContentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FrameVerdict>>,
}

impl ModerationVerdict {
    pub fn flagged(&self) -> bool {
        self.flagged
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn source(&self) -> ContentSource {
        self.source
    }

    /// Per-frame results for image and video verdicts.
    pub fn details(&self) -> Option<&[FrameVerdict]> {
        self.details.as_deref()
    }

    fn from_frames(source: ContentSource, frames: Vec<FrameVerdict>) -> Self {
        Self {
            flagged: frames.iter().any(|f| f.flagged),
            score: frames.iter().map(|f| f.score).fold(0.0, f64::max),
            source,
            details: Some(frames),
        }
    }
}

/// How video requests are sampled and classified.
#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub frame_count: u32,
    /// Frames classified in parallel; 1 classifies strictly in order.
    pub frame_concurrency: usize,
    /// Parent directory for per-call scratch sessions.
    pub scratch_root: PathBuf,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            frame_concurrency: 1,
            scratch_root: std::env::temp_dir(),
        }
    }
}

/// Entry point for callers: moderates text, images, and video.
///
/// Cheap to share behind an Arc; every call is independent and concurrent
/// calls never share scratch space.
pub struct ModerationService {
    text: TextModerator,
    registry: ModelRegistry,
    sampler: Arc<dyn FrameSampler>,
    policy: ExplicitContentPolicy,
    video: VideoSettings,
}

impl ModerationService {
    /// A service with the default word list, policy, and video settings.
    pub fn new(registry: ModelRegistry, sampler: Arc<dyn FrameSampler>) -> Self {
        Self {
            text: TextModerator::default(),
            registry,
            sampler,
            policy: ExplicitContentPolicy::default(),
            video: VideoSettings::default(),
        }
    }

    pub fn with_text_moderator(mut self, text: TextModerator) -> Self {
        self.text = text;
        self
    }

    pub fn with_policy(mut self, policy: ExplicitContentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_video_settings(mut self, video: VideoSettings) -> Self {
        self.video = video;
        self
    }

    /// Wire the production stack from configuration and start loading the
    /// ONNX model in the background. Must be called within a Tokio runtime.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let text = match &config.wordlist_path {
            Some(path) => TextModerator::with_wordlist_file(path)?,
            None => TextModerator::default(),
        };

        let model_dir = config.model_dir.clone();
        let options = config.classifier_options();
        let registry = ModelRegistry::spawn(config.model_load_timeout, move || {
            let classifier = OnnxImageClassifier::load(&model_dir, options)?;
            Ok(Arc::new(classifier) as ModelHandle)
        });

        let sampler = Arc::new(FfmpegSampler::new(config.ffmpeg_options()));

        Ok(Self::new(registry, sampler)
            .with_text_moderator(text)
            .with_policy(config.policy())
            .with_video_settings(VideoSettings {
                frame_count: config.frame_count,
                frame_concurrency: config.frame_concurrency,
                scratch_root: config.scratch_dir.clone(),
            }))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ExplicitContentPolicy {
        &self.policy
    }

    /// Dictionary check only; empty or absent text is not flagged.
    pub fn moderate_text(&self, text: Option<&str>) -> bool {
        self.text.moderate_text(text)
    }

    /// Waits for the model if it is still loading.
    pub async fn moderate_image(&self, image: &ImageSource) -> Result<bool> {
        moderate_image(&self.registry, &self.policy, image).await
    }

    /// Moderate one request.
    ///
    /// Image errors surface as-is; video errors surface as ModerationFailed
    /// after the scratch session has been removed.
    pub async fn moderate(&self, request: ModerationRequest) -> Result<ModerationVerdict> {
        let verdict = match request {
            ModerationRequest::Text(text) => {
                let flagged = self.text.moderate_text(Some(text.as_str()));
                ModerationVerdict {
                    flagged,
                    score: if flagged { 1.0 } else { 0.0 },
                    source: ContentSource::Text,
                    details: None,
                }
            }
            ModerationRequest::Image(image) => {
                let assessment = assess_image(&self.registry, &self.policy, &image).await?;
                ModerationVerdict::from_frames(
                    ContentSource::Image,
                    vec![FrameVerdict::from_assessment(0, assessment)],
                )
            }
            ModerationRequest::Video(path) => self.moderate_video(&path).await?,
        };

        if verdict.flagged {
            info!(source = ?verdict.source, score = verdict.score, "Content flagged");
        }
        Ok(verdict)
    }

    async fn moderate_video(&self, video: &Path) -> Result<ModerationVerdict> {
        let session = ScratchSession::create(&self.video.scratch_root)
            .await
            .map_err(ModerationError::moderation_failed)?;

        let outcome = self.scan_frames(video, session.path()).await;
        session.close().await;

        outcome.map_err(|e| {
            warn!(video = %video.display(), error = %e, "Video moderation failed");
            ModerationError::moderation_failed(e)
        })
    }

    async fn scan_frames(&self, video: &Path, out_dir: &Path) -> Result<ModerationVerdict> {
        let mut frames = self
            .sampler
            .sample(video, self.video.frame_count, out_dir)
            .await?;
        let batch_size = self.video.frame_concurrency.max(1);
        let mut details: Vec<FrameVerdict> = Vec::new();

        loop {
            let batch: Vec<ImageSource> = frames
                .by_ref()
                .take(batch_size)
                .map(ImageSource::Path)
                .collect();
            if batch.is_empty() {
                break;
            }

            // Every started classification resolves before we return
            let assessments = future::join_all(
                batch
                    .iter()
                    .map(|frame| assess_image(&self.registry, &self.policy, frame)),
            )
            .await;

            let mut batch_flagged = false;
            for assessment in assessments {
                let frame = FrameVerdict::from_assessment(details.len(), assessment?);
                debug!(
                    video = %video.display(),
                    frame = frame.index,
                    score = frame.score,
                    flagged = frame.flagged,
                    "Classified frame"
                );
                batch_flagged |= frame.flagged;
                details.push(frame);
            }

            if batch_flagged {
                debug!(
                    video = %video.display(),
                    classified = details.len(),
                    skipped = frames.len(),
                    "Flagged frame found, skipping remaining frames"
                );
                break;
            }
        }

        Ok(ModerationVerdict::from_frames(ContentSource::Video, details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_media_path_dispatches_by_extension() {
        assert!(matches!(
            ModerationRequest::from_media_path("/up/a.JPG"),
            Some(ModerationRequest::Image(_))
        ));
        assert!(matches!(
            ModerationRequest::from_media_path("/up/clip.mp4"),
            Some(ModerationRequest::Video(_))
        ));
        assert!(ModerationRequest::from_media_path("/up/notes.txt").is_none());
        assert!(ModerationRequest::from_media_path("/up/no_extension").is_none());
    }

    #[test]
    fn test_request_source() {
        assert_eq!(ModerationRequest::Text("hi".into()).source(), ContentSource::Text);
        assert_eq!(
            ModerationRequest::Video(PathBuf::from("v.mp4")).source(),
            ContentSource::Video
        );
    }

    #[test]
    fn test_from_frames_aggregates_max_and_any() {
        let frame = |index, score: f64, flagged| FrameVerdict {
            index,
            flagged,
            score,
            categories: ClassificationResult::default(),
        };
        let verdict = ModerationVerdict::from_frames(
            ContentSource::Video,
            vec![frame(0, 0.1, false), frame(1, 0.9, true), frame(2, 0.4, false)],
        );
        assert!(verdict.flagged());
        assert!((verdict.score() - 0.9).abs() < 1e-12);
        assert_eq!(verdict.details().unwrap().len(), 3);
    }

    #[test]
    fn test_empty_frames_are_clean() {
        let verdict = ModerationVerdict::from_frames(ContentSource::Video, Vec::new());
        assert!(!verdict.flagged());
        assert_eq!(verdict.score(), 0.0);
    }

    #[test]
    fn test_verdict_serialization_shape() {
        let verdict = ModerationVerdict {
            flagged: true,
            score: 1.0,
            source: ContentSource::Text,
            details: None,
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "flagged": true, "score": 1.0, "source": "text" })
        );
    }
}
