use crate::server::SharedState;
use action_recognition::{
    model_service::ModelService, response::HealthStatus, video::VideoDecoder,
};
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    status: HealthStatus,
    timestamp: DateTime<Utc>,
}

pub async fn healthcheck<M: ModelService, D: VideoDecoder>(
    State(state): State<SharedState<M, D>>,
) -> Json<HealthResponse> {
    state.metrics.record_request("/api/v1/health");
    Json(HealthResponse {
        status: state.orchestrator.health(),
        timestamp: Utc::now(),
    })
}
