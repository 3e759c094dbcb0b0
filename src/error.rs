use std::path::PathBuf;

/// Failure modes of the moderation pipeline.
///
/// Text moderation has no variant here: it is total over its input. Every
/// other failure reaches the caller explicitly so the host service can pick
/// its own fallback (block, allow pending review, retry). Nothing in this
/// crate converts an error into a "not flagged" verdict.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// The image could not be read or decoded into pixels.
    #[error("Invalid image ({origin}): {reason}")]
    InvalidImage {
        /// File path, or `<N bytes>` for in-memory payloads.
        origin: String,
        reason: String,
    },

    /// The frame extraction tool failed, timed out, or was not found.
    #[error("Frame extraction failed for {}: {reason}", .video.display())]
    TranscodeFailure { video: PathBuf, reason: String },

    /// The classification model failed to load, timed out, or inference failed.
    #[error("Classification model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// A per-call scratch directory could not be created.
    #[error("Could not create scratch directory under {}: {source}", .root.display())]
    ScratchUnavailable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Video moderation failed. Scratch cleanup has already run.
    #[error("Video moderation failed: {source}")]
    ModerationFailed {
        #[source]
        source: Box<ModerationError>,
    },
}

impl ModerationError {
    pub(crate) fn invalid_image(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidImage {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn model_unavailable(reason: impl ToString) -> Self {
        Self::ModelUnavailable {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn moderation_failed(source: ModerationError) -> Self {
        Self::ModerationFailed {
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `ModerationFailed` wrappers.
    pub fn root_cause(&self) -> &ModerationError {
        match self {
            Self::ModerationFailed { source } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModerationError>;
