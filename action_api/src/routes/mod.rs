mod classes;
mod health;
mod metrics;
mod predict;

use crate::server::SharedState;
use action_recognition::{config::UploadConfig, model_service::ModelService, video::VideoDecoder};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

// Room for multipart boundaries and part headers on top of the file payloads.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Body limits are per route: a single prediction never buffers more than
/// one file, a batch at most `max_batch_size` of them.
pub fn api_routes<M: ModelService, D: VideoDecoder>(
    limits: &UploadConfig,
) -> Router<SharedState<M, D>> {
    let file_limit = usize::try_from(limits.max_file_size_bytes).unwrap_or(usize::MAX);
    let single_limit = file_limit.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let batch_limit = file_limit
        .saturating_mul(limits.max_batch_size)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health::healthcheck::<M, D>))
        .route("/api/v1/model/info", get(classes::model_info::<M, D>))
        .route("/api/v1/classes", get(classes::classes::<M, D>))
        .route(
            "/api/v1/predict",
            post(predict::predict::<M, D>).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/api/v1/predict/batch",
            post(predict::predict_batch::<M, D>).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/metrics", get(metrics::metrics_handler::<M, D>))
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "Action Recognition API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/v1/health",
        "endpoints": {
            "predict": "/api/v1/predict",
            "batch_predict": "/api/v1/predict/batch",
            "classes": "/api/v1/classes",
            "model_info": "/api/v1/model/info",
            "health": "/api/v1/health",
            "metrics": "/metrics"
        }
    }))
}
