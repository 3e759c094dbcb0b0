// Process-wide classifier lifecycle and readiness gate.
//
// The model is loaded once, in the background, as soon as the host starts.
// State moves forward only: Uninitialized -> Loading -> Ready | Failed.
// Requests that arrive while the model is still loading wait on a watch
// channel instead of racing ahead with no model. A failed or timed-out load
// is terminal and every later caller gets ModelUnavailable immediately.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{ModerationError, Result};
use crate::vision::traits::ModelHandle;

#[derive(Clone)]
enum ModelState {
    Uninitialized,
    Loading,
    Ready(ModelHandle),
    Failed(String),
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("Uninitialized"),
            Self::Loading => f.write_str("Loading"),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

/// Lifecycle stage of the shared model, for readiness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

/// Shared handle to the process-wide model state. Cloning is cheap and all
/// clones observe the same state.
#[derive(Clone)]
pub struct ModelRegistry {
    state: Arc<watch::Sender<ModelState>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ModelRegistry {
    /// A registry with no load started yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ModelState::Uninitialized);
        Self {
            state: Arc::new(tx),
        }
    }

    /// A registry that is already Ready with `model`.
    pub fn ready(model: ModelHandle) -> Self {
        let (tx, _rx) = watch::channel(ModelState::Ready(model));
        Self {
            state: Arc::new(tx),
        }
    }

    /// Create a registry and immediately start loading with `loader`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(load_timeout: Duration, loader: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ModelHandle> + Send + 'static,
    {
        let registry = Self::new();
        registry.start_loading(load_timeout, loader);
        registry
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.state.borrow() {
            ModelState::Uninitialized => ModelStatus::Uninitialized,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Failed(_) => ModelStatus::Failed,
        }
    }

    /// Begin loading the model on a blocking thread, bounded by `load_timeout`.
    ///
    /// Only the first call has any effect; returns false if a load was
    /// already started (or the registry was created Ready).
    /// Must be called from within a Tokio runtime.
    pub fn start_loading<F>(&self, load_timeout: Duration, loader: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<ModelHandle> + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if matches!(state, ModelState::Uninitialized) {
                *state = ModelState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            warn!(status = ?self.status(), "Model load already started, ignoring");
            return false;
        }

        info!(timeout_secs = load_timeout.as_secs_f64(), "Loading classification model");

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let started_at = Instant::now();
            let outcome =
                match tokio::time::timeout(load_timeout, tokio::task::spawn_blocking(loader)).await
                {
                    Ok(Ok(Ok(model))) => ModelState::Ready(model),
                    Ok(Ok(Err(e))) => ModelState::Failed(format!("{e:#}")),
                    Ok(Err(e)) => ModelState::Failed(format!("Model loader panicked: {e}")),
                    Err(_) => ModelState::Failed(format!(
                        "Model load timed out after {:.1}s",
                        load_timeout.as_secs_f64()
                    )),
                };

            match &outcome {
                ModelState::Ready(_) => info!(
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Classification model ready"
                ),
                ModelState::Failed(reason) => error!(reason = %reason, "Classification model failed to load"),
                _ => {}
            }

            state.send_replace(outcome);
        });

        true
    }

    /// Suspend until the model is Ready, then return a shared handle.
    ///
    /// Fails fast with ModelUnavailable once the load has failed, or when
    /// no load was ever started.
    pub async fn ensure_ready(&self) -> Result<ModelHandle> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, ModelState::Loading))
            .await
            .map_err(|_| ModerationError::model_unavailable("Model registry shut down"))?;

        match &*state {
            ModelState::Ready(model) => Ok(Arc::clone(model)),
            ModelState::Failed(reason) => Err(ModerationError::model_unavailable(reason)),
            ModelState::Uninitialized => {
                Err(ModerationError::model_unavailable("Model load never started"))
            }
            ModelState::Loading => Err(ModerationError::model_unavailable(
                "Model still loading after wait",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::traits::{ClassificationResult, ImageClassifier, ImageSource};
    use async_trait::async_trait;

    struct FixedClassifier;

    #[async_trait]
    impl ImageClassifier for FixedClassifier {
        async fn classify(&self, _image: &ImageSource) -> Result<ClassificationResult> {
            Ok(ClassificationResult::from_pairs([("Porn", 0.9)]))
        }
    }

    fn slow_loader(delay: Duration) -> impl FnOnce() -> anyhow::Result<ModelHandle> + Send {
        move || {
            std::thread::sleep(delay);
            Ok(Arc::new(FixedClassifier) as ModelHandle)
        }
    }

    #[tokio::test]
    async fn test_early_callers_wait_for_load() {
        let registry = ModelRegistry::spawn(Duration::from_secs(5), slow_loader(Duration::from_millis(150)));
        assert_eq!(registry.status(), ModelStatus::Loading);

        let (a, b) = tokio::join!(registry.ensure_ready(), registry.ensure_ready());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(registry.status(), ModelStatus::Ready);
    }

    #[tokio::test]
    async fn test_load_failure_is_terminal() {
        let registry = ModelRegistry::spawn(Duration::from_secs(5), || {
            anyhow::bail!("model.onnx is corrupt")
        });

        for _ in 0..2 {
            let err = registry.ensure_ready().await.err().expect("load failed");
            match err {
                ModerationError::ModelUnavailable { reason } => {
                    assert!(reason.contains("corrupt"), "got: {reason}")
                }
                other => panic!("expected ModelUnavailable, got {other:?}"),
            }
        }
        assert_eq!(registry.status(), ModelStatus::Failed);
    }

    #[tokio::test]
    async fn test_load_timeout_is_model_unavailable() {
        let registry = ModelRegistry::spawn(
            Duration::from_millis(50),
            slow_loader(Duration::from_millis(500)),
        );
        let err = registry.ensure_ready().await.err().expect("load timed out");
        assert!(matches!(err, ModerationError::ModelUnavailable { .. }));
        assert!(err.to_string().contains("timed out"), "got: {err}");
    }

    #[tokio::test]
    async fn test_unstarted_registry_fails_fast() {
        let registry = ModelRegistry::default();
        let err = tokio::time::timeout(Duration::from_secs(1), registry.ensure_ready())
            .await
            .expect("must not wait for a load that was never started")
            .err()
            .expect("no model");
        assert!(err.to_string().contains("never started"), "got: {err}");
        assert_eq!(registry.status(), ModelStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.status(), ModelStatus::Uninitialized);
        assert!(registry.start_loading(Duration::from_secs(5), slow_loader(Duration::ZERO)));
        assert!(!registry.start_loading(Duration::from_secs(5), || {
            anyhow::bail!("must not run")
        }));
        assert!(registry.ensure_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_ready_registry_needs_no_load() {
        let registry = ModelRegistry::ready(Arc::new(FixedClassifier));
        assert_eq!(registry.status(), ModelStatus::Ready);
        let model = registry.ensure_ready().await.unwrap();
        let result = model.classify(&ImageSource::from(vec![0u8])).await.unwrap();
        assert!((result.probability_of("porn") - 0.9).abs() < 1e-12);
    }
}
