use crate::{error::ApiError, server::SharedState, telemetry::Metrics};
use action_recognition::{
    model_service::ModelService,
    response::{BatchEntry, BatchResponse, ErrorDetail, Outcome, PredictionResponse},
    video::{Upload, VideoDecoder},
    ErrorKind, PipelineError,
};
use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::QueryRejection,
        Multipart, Query, State,
    },
    Json,
};
use serde::Deserialize;
use std::time::Instant;
use tracing::instrument;

const PREDICT_ROUTE: &str = "/api/v1/predict";
const BATCH_ROUTE: &str = "/api/v1/predict/batch";

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub top_k: Option<usize>,
}

enum FilePart {
    Complete(Upload),
    TooLarge { filename: String, detail: ErrorDetail },
}

/// Reads one file part. Past `limit` bytes the rest of the part is skipped
/// without being buffered.
async fn read_upload(mut field: Field<'_>, limit: u64) -> Result<FilePart, ApiError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);

    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if (data.len() + chunk.len()) as u64 > limit {
            while field.chunk().await?.is_some() {}
            return Ok(FilePart::TooLarge {
                filename,
                detail: ErrorDetail::new(
                    ErrorKind::FileTooLarge,
                    format!("file exceeds the maximum of {} bytes", limit),
                ),
            });
        }
        data.extend_from_slice(&chunk);
    }

    let upload = Upload::new(filename, data);
    Ok(FilePart::Complete(match content_type {
        Some(content_type) => upload.with_content_type(content_type),
        None => upload,
    }))
}

/// Puts the rejected parts back at their original positions.
fn merge_rejected(slots: Vec<Option<BatchEntry>>, processed: BatchResponse, elapsed_ms: f64) -> BatchResponse {
    let mut processed = processed.results.into_iter();
    let results = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| processed.next()))
        .collect();
    BatchResponse::new(results, elapsed_ms)
}

fn not_ready() -> ApiError {
    ApiError(ErrorDetail::from(PipelineError::ModelNotLoaded))
}

fn record_outcome<T>(metrics: &Metrics, result: &Result<T, ErrorDetail>, route: &str) {
    match result {
        Ok(_) => metrics.record_outcome("success", route),
        Err(detail) => metrics.record_outcome(detail.error.as_str(), route),
    }
}

#[instrument(skip_all)]
pub async fn predict<M: ModelService, D: VideoDecoder>(
    State(state): State<SharedState<M, D>>,
    params: Result<Query<PredictParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    state.metrics.record_request(PREDICT_ROUTE);
    if !state.orchestrator.is_ready() {
        return Err(not_ready());
    }

    let Query(params) = params.map_err(|e| ApiError::malformed(e.body_text()))?;
    let mut multipart = multipart.map_err(|e| ApiError::malformed(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            match read_upload(field, state.orchestrator.max_file_size_bytes()).await? {
                FilePart::Complete(file) => upload = Some(file),
                FilePart::TooLarge { detail, .. } => {
                    state.metrics.record_outcome(detail.error.as_str(), PREDICT_ROUTE);
                    return Err(ApiError(detail));
                }
            }
            break;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::malformed("missing multipart field `file`"))?;

    let started = Instant::now();
    let result = state.orchestrator.handle_request(upload, params.top_k).await;
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, PREDICT_ROUTE);
    record_outcome(&state.metrics, &result, PREDICT_ROUTE);

    Ok(Json(result?))
}

#[instrument(skip_all)]
pub async fn predict_batch<M: ModelService, D: VideoDecoder>(
    State(state): State<SharedState<M, D>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    state.metrics.record_request(BATCH_ROUTE);
    if !state.orchestrator.is_ready() {
        return Err(not_ready());
    }

    let mut multipart = multipart.map_err(|e| ApiError::malformed(e.body_text()))?;
    let limit = state.orchestrator.max_batch_size();

    // `None` marks a part handed to the pipeline, `Some` one already rejected.
    let mut slots: Vec<Option<BatchEntry>> = Vec::new();
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        if slots.len() == limit {
            return Err(ApiError::malformed(format!(
                "maximum {} files allowed per batch",
                limit
            )));
        }
        match read_upload(field, state.orchestrator.max_file_size_bytes()).await? {
            FilePart::Complete(upload) => {
                slots.push(None);
                uploads.push(upload);
            }
            FilePart::TooLarge { filename, detail } => slots.push(Some(BatchEntry {
                filename,
                outcome: Outcome::Failure(detail),
            })),
        }
    }

    let started = Instant::now();
    let result = if uploads.is_empty() && !slots.is_empty() {
        Ok(BatchResponse::new(Vec::new(), 0.0))
    } else {
        state.orchestrator.handle_batch(uploads).await
    };
    let result = result.map(|processed| {
        merge_rejected(slots, processed, started.elapsed().as_secs_f64() * 1000.0)
    });
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, BATCH_ROUTE);
    record_outcome(&state.metrics, &result, BATCH_ROUTE);

    Ok(Json(result?))
}
