// Threshold policy that turns per-category probabilities into a flag.

use serde::Serialize;

use super::traits::{ClassificationResult, ImageSource};
use crate::error::Result;
use crate::registry::ModelRegistry;

/// Flag threshold used unless configured otherwise.
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Category needle used unless configured otherwise.
pub const DEFAULT_CATEGORY: &str = "porn";

/// Flags an image when the explicit category's probability strictly exceeds
/// the threshold. The category is located by case-insensitive substring match.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitContentPolicy {
    pub category: String,
    pub threshold: f64,
}

impl Default for ExplicitContentPolicy {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Outcome of classifying one image under a policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageAssessment {
    pub flagged: bool,
    /// Probability of the explicit category (0 when the model lacks it).
    pub score: f64,
    pub categories: ClassificationResult,
}

impl ExplicitContentPolicy {
    pub fn evaluate(&self, categories: ClassificationResult) -> ImageAssessment {
        let score = categories.probability_of(&self.category);
        ImageAssessment {
            flagged: score > self.threshold,
            score,
            categories,
        }
    }
}

/// Wait for the model, classify `image`, and apply `policy`.
pub async fn assess_image(
    registry: &ModelRegistry,
    policy: &ExplicitContentPolicy,
    image: &ImageSource,
) -> Result<ImageAssessment> {
    let model = registry.ensure_ready().await?;
    let categories = model.classify(image).await?;
    Ok(policy.evaluate(categories))
}

/// True when `image` should be flagged under `policy`.
pub async fn moderate_image(
    registry: &ModelRegistry,
    policy: &ExplicitContentPolicy,
    image: &ImageSource,
) -> Result<bool> {
    Ok(assess_image(registry, policy, image).await?.flagged)
}
