// Local ONNX image classifier.
//
// Runs an NSFW-style image classification model entirely on the local CPU.
// The model directory holds `model.onnx` and, optionally, `labels.json`
// (a JSON array of category names in output order). Without labels the
// classic five NSFW classes are assumed.
//
// Input: one RGB image resized to input_size x input_size, scaled to [0, 1],
// in NHWC or NCHW layout depending on how the model was exported.
// Output: one row of per-category scores, used directly when they already
// form a probability distribution and passed through softmax otherwise.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::download::{LABELS_FILE, MODEL_FILE};
use super::traits::{ClassificationResult, ImageClassifier, ImageSource};
use crate::error::{ModerationError, Result};

/// Output classes of the widely used five-way NSFW models, in output order.
pub const DEFAULT_LABELS: [&str; 5] = ["Drawing", "Hentai", "Neutral", "Porn", "Sexy"];

/// Tolerance when deciding whether raw outputs already sum to 1.
const DISTRIBUTION_TOLERANCE: f64 = 1e-3;

/// Memory layout of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    /// `[1, H, W, 3]` — TensorFlow/Keras exports.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]` — PyTorch exports.
    Nchw,
}

impl FromStr for PixelLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(Self::Nhwc),
            "nchw" => Ok(Self::Nchw),
            other => anyhow::bail!("Unknown pixel layout {other:?} (expected nhwc or nchw)"),
        }
    }
}

/// How images are shaped before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Edge length of the square model input, in pixels.
    pub input_size: u32,
    pub layout: PixelLayout,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            input_size: 224,
            layout: PixelLayout::Nhwc,
        }
    }
}

/// ONNX-backed classifier. The session sits behind Arc<Mutex> because
/// `Session::run` takes `&mut self` and inference runs on spawn_blocking
/// threads, which need 'static shared ownership.
pub struct OnnxImageClassifier {
    session: Arc<Mutex<Session>>,
    labels: Arc<Vec<String>>,
    options: ClassifierOptions,
}

impl OnnxImageClassifier {
    /// Load `model.onnx` (and `labels.json` if present) from `model_dir`.
    pub fn load(model_dir: &Path, options: ClassifierOptions) -> anyhow::Result<Self> {
        let model_path = model_dir.join(MODEL_FILE);
        if !model_path.exists() {
            anyhow::bail!(
                "Model file not found: {}\nSet VIGIL_MODEL_URL and run the model download first.",
                model_path.display()
            );
        }

        let labels = load_labels(model_dir)?;

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;

        debug!(
            model_dir = %model_dir.display(),
            labels = labels.len(),
            input_size = options.input_size,
            layout = ?options.layout,
            "Loaded ONNX image classifier"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: Arc::new(labels),
            options,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[async_trait]
impl ImageClassifier for OnnxImageClassifier {
    /// Decoding, resizing and inference all run on a blocking thread so the
    /// async runtime stays responsive for unrelated moderation calls.
    async fn classify(&self, image: &ImageSource) -> Result<ClassificationResult> {
        let session = Arc::clone(&self.session);
        let labels = Arc::clone(&self.labels);
        let options = self.options;
        let image = image.clone();

        tokio::task::spawn_blocking(move || {
            let decoded = decode_image(&image)?;
            let pixels = preprocess(&decoded, options);
            let tensor = Tensor::from_array((input_shape(options), pixels)).map_err(|e| {
                ModerationError::model_unavailable(format!("Failed to create input tensor: {e}"))
            })?;

            let raw = {
                let mut session = session.lock().map_err(|e| {
                    ModerationError::model_unavailable(format!("Session lock poisoned: {e}"))
                })?;

                let outputs = session.run(ort::inputs![tensor]).map_err(|e| {
                    ModerationError::model_unavailable(format!("ONNX inference failed: {e}"))
                })?;

                let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                    ModerationError::model_unavailable(format!(
                        "Failed to extract output tensor: {e}"
                    ))
                })?;

                data.to_vec()
            };

            let result = scores_to_result(&labels, &raw)?;
            debug!(
                origin = %image.origin(),
                top = ?result.top().map(|c| (&c.category, c.probability)),
                "ONNX classified image"
            );
            Ok(result)
        })
        .await
        .map_err(|e| ModerationError::model_unavailable(format!("Inference task panicked: {e}")))?
    }
}

/// Read `labels.json` from the model directory, falling back to the default classes.
fn load_labels(model_dir: &Path) -> anyhow::Result<Vec<String>> {
    let labels_path = model_dir.join(LABELS_FILE);
    if !labels_path.exists() {
        return Ok(DEFAULT_LABELS.iter().map(|l| l.to_string()).collect());
    }

    let json = std::fs::read_to_string(&labels_path)
        .with_context(|| format!("Failed to read {}", labels_path.display()))?;
    let labels: Vec<String> = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a JSON array of strings", labels_path.display()))?;
    if labels.is_empty() {
        anyhow::bail!("{} lists no categories", labels_path.display());
    }
    Ok(labels)
}

/// Decode an image payload into pixels.
pub(crate) fn decode_image(image: &ImageSource) -> Result<DynamicImage> {
    match image {
        ImageSource::Path(path) => ImageReader::open(path)
            .map_err(|e| ModerationError::invalid_image(image.origin(), e))?
            .with_guessed_format()
            .map_err(|e| ModerationError::invalid_image(image.origin(), e))?
            .decode()
            .map_err(|e| ModerationError::invalid_image(image.origin(), e)),
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes)
            .map_err(|e| ModerationError::invalid_image(image.origin(), e)),
    }
}

fn input_shape(options: ClassifierOptions) -> [i64; 4] {
    let size = options.input_size as i64;
    match options.layout {
        PixelLayout::Nhwc => [1, size, size, 3],
        PixelLayout::Nchw => [1, 3, size, size],
    }
}

/// Resize to the model's square input and flatten to f32 in [0, 1].
fn preprocess(image: &DynamicImage, options: ClassifierOptions) -> Vec<f32> {
    let size = options.input_size;
    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let plane = (size * size) as usize;

    match options.layout {
        PixelLayout::Nhwc => rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        PixelLayout::Nchw => {
            let mut data = vec![0f32; 3 * plane];
            for (i, pixel) in rgb.pixels().enumerate() {
                data[i] = pixel[0] as f32 / 255.0;
                data[plane + i] = pixel[1] as f32 / 255.0;
                data[2 * plane + i] = pixel[2] as f32 / 255.0;
            }
            data
        }
    }
}

/// Use raw outputs as-is when they already form a distribution, otherwise softmax them.
fn normalize_scores(raw: &[f32]) -> Vec<f64> {
    let values: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
    let in_range = values.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f64 = values.iter().sum();
    if in_range && (sum - 1.0).abs() < DISTRIBUTION_TOLERANCE {
        return values;
    }
    softmax(&values)
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Check raw model output against the label list, then normalize and label it.
/// Output that cannot be trusted is a model error, never an empty result.
fn scores_to_result(labels: &[String], raw: &[f32]) -> Result<ClassificationResult> {
    if raw.is_empty() {
        return Err(ModerationError::model_unavailable("Model produced no output scores"));
    }
    if raw.len() != labels.len() {
        return Err(ModerationError::model_unavailable(format!(
            "Model produced {} scores but {} labels are configured",
            raw.len(),
            labels.len()
        )));
    }
    if let Some(i) = raw.iter().position(|v| !v.is_finite()) {
        return Err(ModerationError::model_unavailable(format!(
            "Model produced non-finite score {} for {}",
            raw[i], labels[i]
        )));
    }
    Ok(build_result(labels, &normalize_scores(raw)))
}

/// Pair scores with labels and sort by descending probability.
fn build_result(labels: &[String], scores: &[f64]) -> ClassificationResult {
    let mut pairs: Vec<(String, f64)> = labels
        .iter()
        .cloned()
        .zip(scores.iter().copied())
        .collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    ClassificationResult::from_pairs(pairs)
}
