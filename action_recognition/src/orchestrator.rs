use crate::{
    aggregator::aggregate,
    config::{Config, PredictionConfig},
    engine::InferenceEngine,
    error::PipelineError,
    model_service::ModelService,
    registry::{ClassEntry, ClassRegistry},
    response::{
        BatchEntry, BatchResponse, ErrorDetail, HealthStatus, ModelInfo, Outcome,
        PredictionResponse, VideoInfo,
    },
    sampler::{FrameBatch, FrameSampler, SampleError},
    video::{ContainerFormat, Upload, VideoDecoder, VideoLoader},
};
use futures::{stream, StreamExt};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::instrument;

/// Progress of one request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    FramesExtracted,
    Inferred,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Validated => "VALIDATED",
            Stage::FramesExtracted => "FRAMES_EXTRACTED",
            Stage::Inferred => "INFERRED",
            Stage::Responded => "RESPONDED",
        };
        f.write_str(name)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// Aborts the spawned task if the batch future is dropped first.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs single and batch prediction requests end to end.
pub struct Orchestrator<M, D> {
    engine: Arc<InferenceEngine<M>>,
    registry: Arc<ClassRegistry>,
    decoder: Arc<D>,
    loader: VideoLoader,
    sampler: FrameSampler,
    prediction: PredictionConfig,
    decode_timeout: Duration,
    max_batch_size: usize,
    max_file_size_bytes: u64,
    batch_concurrency: usize,
    model_name: String,
    model_file: String,
}

impl<M, D> Clone for Orchestrator<M, D> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            decoder: Arc::clone(&self.decoder),
            loader: self.loader.clone(),
            sampler: self.sampler.clone(),
            prediction: self.prediction.clone(),
            decode_timeout: self.decode_timeout,
            max_batch_size: self.max_batch_size,
            max_file_size_bytes: self.max_file_size_bytes,
            batch_concurrency: self.batch_concurrency,
            model_name: self.model_name.clone(),
            model_file: self.model_file.clone(),
        }
    }
}

impl<M: ModelService, D: VideoDecoder> Orchestrator<M, D> {
    pub fn new(
        config: &Config,
        engine: Arc<InferenceEngine<M>>,
        registry: Arc<ClassRegistry>,
        decoder: Arc<D>,
    ) -> Self {
        Self {
            engine,
            registry,
            decoder,
            loader: VideoLoader::new(config.upload.clone()),
            sampler: FrameSampler::new(config.frames.clone()),
            prediction: config.prediction.clone(),
            decode_timeout: Duration::from_millis(config.upload.decode_timeout_ms),
            max_batch_size: config.upload.max_batch_size,
            max_file_size_bytes: config.upload.max_file_size_bytes,
            batch_concurrency: config.upload.batch_concurrency,
            model_name: config.model.name.clone(),
            model_file: config.model.onnx_file.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_loaded()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::new(self.engine.is_loaded())
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_name: self.model_name.clone(),
            model_path: self.model_file.clone(),
            num_classes: self.registry.len(),
            classes: self.registry.labels().to_vec(),
            input_shape: self.engine.input_shape().into(),
            is_loaded: self.engine.is_loaded(),
        }
    }

    pub fn classes(&self) -> Vec<ClassEntry> {
        self.registry.entries()
    }

    /// Predicts the action in one upload. `top_k` falls back to the
    /// configured default.
    #[instrument(skip_all, fields(filename = %upload.filename, size_bytes = upload.size_bytes()))]
    pub async fn handle_request(
        &self,
        upload: Upload,
        top_k: Option<usize>,
    ) -> Result<PredictionResponse, ErrorDetail> {
        let top_k = top_k.unwrap_or(self.prediction.default_top_k);
        let mut stage = Stage::Received;

        match self.process(&upload, top_k, &mut stage).await {
            Ok(response) => {
                tracing::info!(
                    action = %response.prediction.action,
                    confidence = response.prediction.confidence,
                    processing_time_ms = response.processing_time_ms,
                    "prediction complete"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e.kind(), "request failed: {}", e);
                Err(ErrorDetail::from(&e))
            }
        }
    }

    async fn process(
        &self,
        upload: &Upload,
        top_k: usize,
        stage: &mut Stage,
    ) -> Result<PredictionResponse, PipelineError> {
        if !self.engine.is_loaded() {
            return Err(PipelineError::ModelNotLoaded);
        }

        let container = self.loader.validate(upload)?;
        advance(stage, Stage::Validated);
        let started = Instant::now();

        let (video_info, batch) = tokio::time::timeout(self.decode_timeout, self.extract(upload, container))
            .await
            .map_err(|_| PipelineError::DecodeTimeout(self.decode_timeout))??;
        advance(stage, Stage::FramesExtracted);

        let probabilities = self.engine.predict(&batch).await?;
        advance(stage, Stage::Inferred);
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let aggregation = aggregate(&probabilities, top_k, &self.registry);
        let response = PredictionResponse::new(&aggregation, processing_time_ms, video_info);
        advance(stage, Stage::Responded);
        Ok(response)
    }

    /// Persists, probes and samples the upload. The temp file and the decoder
    /// are released when this returns or is dropped.
    async fn extract(
        &self,
        upload: &Upload,
        container: ContainerFormat,
    ) -> Result<(VideoInfo, FrameBatch), PipelineError> {
        let asset = self.loader.load(upload, container, self.decoder.as_ref()).await?;

        let mut source = self
            .decoder
            .open(asset.path(), &asset.info)
            .await
            .map_err(|e| {
                tracing::warn!("failed to start decoding: {}", e);
                PipelineError::FrameExtraction("could not start decoding the video stream".to_string())
            })?;

        let batch = self.sampler.sample(&mut source).await.map_err(|e| match e {
            SampleError::NoFrames => {
                PipelineError::CorruptMedia("video contains no decodable frames".to_string())
            }
            other => {
                tracing::warn!("frame sampling failed: {}", other);
                PipelineError::FrameExtraction("could not decode video frames".to_string())
            }
        })?;

        Ok((asset.video_info(), batch))
    }

    /// Predicts every upload independently, at most `batch_concurrency` at a
    /// time. Results keep the input order.
    #[instrument(skip_all, fields(files = uploads.len()))]
    pub async fn handle_batch(&self, uploads: Vec<Upload>) -> Result<BatchResponse, ErrorDetail> {
        if !self.engine.is_loaded() {
            return Err(ErrorDetail::from(PipelineError::ModelNotLoaded));
        }
        if uploads.is_empty() {
            return Err(ErrorDetail::from(PipelineError::MalformedRequest(
                "no files provided".to_string(),
            )));
        }
        if uploads.len() > self.max_batch_size {
            return Err(ErrorDetail::from(PipelineError::MalformedRequest(format!(
                "maximum {} files allowed per batch, got {}",
                self.max_batch_size,
                uploads.len()
            ))));
        }

        let started = Instant::now();
        let top_k = self.prediction.batch_top_k;

        let results: Vec<BatchEntry> = stream::iter(uploads)
            .map(|upload| {
                let orchestrator = self.clone();
                let filename = upload.filename.clone();
                let mut task = AbortOnDrop(tokio::spawn(async move {
                    orchestrator.handle_request(upload, Some(top_k)).await
                }));
                async move {
                    let outcome = match (&mut task.0).await {
                        Ok(result) => Outcome::from(result),
                        Err(e) => {
                            tracing::error!(filename = %filename, "prediction task failed: {}", e);
                            Outcome::Failure(ErrorDetail::from(PipelineError::Internal(
                                "prediction task failed".to_string(),
                            )))
                        }
                    };
                    BatchEntry { filename, outcome }
                }
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let response = BatchResponse::new(results, started.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            successful = response.successful,
            failed = response.failed,
            "batch complete"
        );
        Ok(response)
    }
}
