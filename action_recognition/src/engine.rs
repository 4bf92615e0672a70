use crate::{
    config::{FrameConfig, ModelConfig, TensorLayout},
    error::PipelineError,
    model_service::{ModelError, ModelService},
    sampler::FrameBatch,
};
use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};
use tracing::instrument;

const SUM_TOLERANCE: f32 = 1e-3;

/// Per-class probabilities, one per registered class, summing to 1.
/// Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    /// Checks a raw model output against the class count. With
    /// `apply_softmax` the values are treated as logits, otherwise they must
    /// already form a distribution.
    pub fn from_model_output(
        raw: Vec<f32>,
        num_classes: usize,
        apply_softmax: bool,
    ) -> Result<Self, PipelineError> {
        if num_classes == 0 {
            return Err(PipelineError::Internal("no classes registered".to_string()));
        }
        if raw.len() != num_classes {
            return Err(PipelineError::Inference(format!(
                "model returned {} scores, expected {}",
                raw.len(),
                num_classes
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Inference(
                "model returned non-finite scores".to_string(),
            ));
        }

        let probabilities = if apply_softmax { softmax(&raw) } else { raw };

        let sum: f32 = probabilities.iter().sum();
        if probabilities.iter().any(|p| *p < 0.0) || (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(PipelineError::Inference(format!(
                "model scores are not a probability distribution (sum {:.4})",
                sum
            )));
        }

        Ok(Self(probabilities))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Holds the model once it is loaded and turns frame batches into
/// probability vectors.
pub struct InferenceEngine<M> {
    model: OnceLock<M>,
    num_classes: usize,
    input_shape: [usize; 4],
    layout: TensorLayout,
    apply_softmax: bool,
    timeout: Duration,
}

impl<M: ModelService> InferenceEngine<M> {
    pub fn new(model_config: &ModelConfig, frames: &FrameConfig, num_classes: usize) -> Self {
        Self {
            model: OnceLock::new(),
            num_classes,
            input_shape: [
                frames.num_frames,
                frames.height as usize,
                frames.width as usize,
                frames.channels,
            ],
            layout: model_config.layout,
            apply_softmax: model_config.apply_softmax,
            timeout: Duration::from_millis(model_config.inference_timeout_ms),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Sets the model. Hands it back if one is already installed.
    pub fn install(&self, model: M) -> Result<(), M> {
        self.model.set(model)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `[frames, height, width, channels]`
    pub fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Loads the model on the blocking pool and installs it. Requests keep
    /// failing with `ModelNotLoaded` until this finishes.
    pub fn load_in_background<F>(self: &Arc<Self>, load: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce() -> Result<M, ModelError> + Send + 'static,
    {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            match tokio::task::spawn_blocking(load).await {
                Ok(Ok(model)) => {
                    if engine.install(model).is_err() {
                        tracing::warn!("model already installed, discarding the new instance");
                    } else {
                        tracing::info!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "model loaded"
                        );
                    }
                }
                Ok(Err(e)) => tracing::error!("model failed to load: {}", e),
                Err(e) => tracing::error!("model loading task failed: {}", e),
            }
        })
    }

    #[instrument(skip_all, fields(frames = batch.len()))]
    pub async fn predict(&self, batch: &FrameBatch) -> Result<ProbabilityVector, PipelineError> {
        let model = self.model.get().ok_or(PipelineError::ModelNotLoaded)?;

        if batch.shape() != self.input_shape {
            return Err(PipelineError::Internal(format!(
                "frame batch shape {:?} does not match model input {:?}",
                batch.shape(),
                self.input_shape
            )));
        }

        let input = batch.to_model_input(self.layout);
        // A timed out call keeps its session busy until the runtime returns.
        let raw = tokio::time::timeout(self.timeout, model.predict(input))
            .await
            .map_err(|_| {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "inference timed out");
                PipelineError::InferenceTimeout(self.timeout)
            })?
            .map_err(|e| {
                tracing::error!("{}", e);
                PipelineError::Inference("model execution failed".to_string())
            })?;

        ProbabilityVector::from_model_output(raw, self.num_classes, self.apply_softmax)
    }
}
