// Image classifier trait — the seam between the pipeline and the model.
//
// The default implementation runs a local ONNX model. Tests and hosts with
// their own inference stack plug in through the same trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// One `(category, probability)` pair from a single inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    /// Probability in [0, 1].
    pub probability: f64,
}

/// Ordered per-category probabilities produced by one inference call.
/// Categories are fixed by the loaded model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClassificationResult(pub Vec<CategoryScore>);

impl ClassificationResult {
    /// Build a result from `(category, probability)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(category, probability)| CategoryScore {
                    category: category.into(),
                    probability,
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CategoryScore> {
        self.0.iter()
    }

    /// Probability of the first category whose name contains `needle`,
    /// compared case-insensitively. Absent categories count as 0.
    pub fn probability_of(&self, needle: &str) -> f64 {
        let needle = needle.to_lowercase();
        self.0
            .iter()
            .find(|c| c.category.to_lowercase().contains(&needle))
            .map(|c| c.probability)
            .unwrap_or(0.0)
    }

    /// The highest-probability category, if any.
    pub fn top(&self) -> Option<&CategoryScore> {
        self.0
            .iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
    }
}

/// An image payload as handed over by the calling collaborator.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl ImageSource {
    /// Human-readable origin for logs and error messages.
    pub fn origin(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

/// Single-image inference. Implementations are shared read-only across
/// concurrent calls and must not mutate model state per call.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Decode `image` and return per-category probabilities.
    ///
    /// Undecodable input is `ModerationError::InvalidImage`; inference
    /// failures are `ModerationError::ModelUnavailable`.
    async fn classify(&self, image: &ImageSource) -> Result<ClassificationResult>;
}

/// Shared handle to a loaded classifier.
pub type ModelHandle = Arc<dyn ImageClassifier>;
