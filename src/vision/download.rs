// Model download helper for the ONNX image classifier.
//
// Fetches `model.onnx` and `labels.json` from a configured base URL
// (VIGIL_MODEL_URL) into the model directory, which defaults to a
// platform data directory (~/.local/share/vigil/models/ on Linux) so the
// files persist across restarts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Model weights file expected in the model directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Optional category names, a JSON array in model output order.
pub const LABELS_FILE: &str = "labels.json";

/// Returns the default directory for storing model files.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("models")
}

/// Check whether the model weights exist. Labels are optional.
pub fn model_files_present(dir: &Path) -> bool {
    dir.join(MODEL_FILE).exists()
}

/// Download the model and its labels from `base_url` into `dir`.
///
/// Skips files that already exist. A missing `labels.json` upstream is not
/// an error: the classifier falls back to its default categories.
pub async fn download_model(base_url: &str, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    let base_url = base_url.trim_end_matches('/');
    let client = reqwest::Client::new();

    let model_path = dir.join(MODEL_FILE);
    if model_path.exists() {
        info!("Model already exists, skipping");
    } else {
        download_file(&client, &format!("{base_url}/{MODEL_FILE}"), &model_path, true).await?;
    }

    let labels_path = dir.join(LABELS_FILE);
    if labels_path.exists() {
        info!("Labels already exist, skipping");
    } else if let Err(e) =
        download_file(&client, &format!("{base_url}/{LABELS_FILE}"), &labels_path, false).await
    {
        info!(error = %e, "No labels downloaded, default categories will be used");
    }

    Ok(())
}

/// Download a single file from a URL to a local path.
/// If `show_progress` is true, display a progress bar.
async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    show_progress: bool,
) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let pb = if show_progress {
        let pb = match response.content_length() {
            Some(size) => {
                let pb = ProgressBar::new(size);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .expect("valid template")
                        .progress_chars("=> "),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("    {spinner} {bytes}")
                        .expect("valid template"),
                );
                pb
            }
        };
        Some(pb)
    } else {
        None
    };

    let bytes = response
        .bytes()
        .await
        .context("Failed to read response body")?;

    if let Some(ref pb) = pb {
        pb.set_position(bytes.len() as u64);
    }

    // A half-written model must never pass model_files_present()
    let partial = dest.with_extension("partial");
    std::fs::write(&partial, &bytes)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    info!(url, dest = %dest.display(), bytes = bytes.len(), "Downloaded model file");
    Ok(())
}
