use crate::server::SharedState;
use action_recognition::{
    model_service::ModelService, registry::ClassEntry, response::ModelInfo, video::VideoDecoder,
};
use axum::{extract::State, Json};

pub async fn classes<M: ModelService, D: VideoDecoder>(
    State(state): State<SharedState<M, D>>,
) -> Json<Vec<ClassEntry>> {
    state.metrics.record_request("/api/v1/classes");
    Json(state.orchestrator.classes())
}

pub async fn model_info<M: ModelService, D: VideoDecoder>(
    State(state): State<SharedState<M, D>>,
) -> Json<ModelInfo> {
    state.metrics.record_request("/api/v1/model/info");
    Json(state.orchestrator.model_info())
}
