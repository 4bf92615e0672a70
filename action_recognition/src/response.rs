use crate::{
    aggregator::{Aggregation, PredictionResult},
    error::{ErrorKind, PipelineError},
    video::MediaInfo,
};
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPrediction {
    pub action: String,
    pub confidence: f32,
    pub class_index: usize,
}

impl From<&PredictionResult> for BestPrediction {
    fn from(result: &PredictionResult) -> Self {
        Self {
            action: result.label.clone(),
            confidence: result.confidence,
            class_index: result.class_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPrediction {
    pub rank: usize,
    pub action: String,
    pub confidence: f32,
}

impl From<&PredictionResult> for TopPrediction {
    fn from(result: &PredictionResult) -> Self {
        Self {
            rank: result.rank,
            action: result.label.clone(),
            confidence: result.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub duration_seconds: Option<f64>,
    pub fps: Option<f64>,
    pub total_frames: Option<usize>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoInfo {
    pub fn new(filename: &str, size_bytes: u64, info: &MediaInfo) -> Self {
        Self {
            filename: filename.to_string(),
            size_bytes,
            size_mb: round2(size_bytes as f64 / BYTES_PER_MB),
            duration_seconds: info.duration_seconds.map(round2),
            fps: info.fps.map(round2),
            total_frames: info.total_frames,
            width: info.width,
            height: info.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: BestPrediction,
    pub top_predictions: Vec<TopPrediction>,
    pub processing_time_ms: f64,
    pub video_info: VideoInfo,
    pub message: String,
}

impl PredictionResponse {
    pub fn new(aggregation: &Aggregation, processing_time_ms: f64, video_info: VideoInfo) -> Self {
        let best = &aggregation.best;
        Self {
            success: true,
            prediction: BestPrediction::from(best),
            top_predictions: aggregation.top_k.iter().map(TopPrediction::from).collect(),
            processing_time_ms: round2(processing_time_ms),
            video_info,
            message: format!(
                "Action recognized: {} ({:.1}% confidence)",
                best.label,
                best.confidence * 100.0
            ),
        }
    }
}

/// Failure payload returned to callers. `detail` is the user-facing cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub success: bool,
    pub error: ErrorKind,
    pub detail: String,
    pub retryable: bool,
}

impl ErrorDetail {
    pub fn new(error: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error,
            detail: detail.into(),
            retryable: false,
        }
    }
}

impl From<&PipelineError> for ErrorDetail {
    fn from(err: &PipelineError) -> Self {
        Self {
            success: false,
            error: err.kind(),
            detail: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<PipelineError> for ErrorDetail {
    fn from(err: PipelineError) -> Self {
        Self::from(&err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success(PredictionResponse),
    Failure(ErrorDetail),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl From<Result<PredictionResponse, ErrorDetail>> for Outcome {
    fn from(result: Result<PredictionResponse, ErrorDetail>) -> Self {
        match result {
            Ok(response) => Outcome::Success(response),
            Err(detail) => Outcome::Failure(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub total_videos: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
    pub total_processing_time_ms: f64,
}

impl BatchResponse {
    pub fn new(results: Vec<BatchEntry>, total_processing_time_ms: f64) -> Self {
        let successful = results.iter().filter(|r| r.outcome.is_success()).count();
        let failed = results.len() - successful;
        Self {
            success: failed == 0,
            total_videos: results.len(),
            successful,
            failed,
            results,
            total_processing_time_ms: round2(total_processing_time_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub version: String,
}

impl HealthStatus {
    pub fn new(model_loaded: bool) -> Self {
        Self {
            status: if model_loaded { "healthy" } else { "degraded" }.to_string(),
            model_loaded,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub num_frames: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl From<[usize; 4]> for InputShape {
    fn from(shape: [usize; 4]) -> Self {
        Self {
            num_frames: shape[0],
            height: shape[1],
            width: shape[2],
            channels: shape[3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_path: String,
    pub num_classes: usize,
    pub classes: Vec<String>,
    pub input_shape: InputShape,
    pub is_loaded: bool,
}
