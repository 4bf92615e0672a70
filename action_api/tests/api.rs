use action_api::{build_router, telemetry::Metrics};
use action_recognition::{
    config::{load_configuration, Config, Environment},
    model_service::{ModelError, ModelService},
    video::{DecodeError, InMemorySource, MediaInfo, VideoDecoder},
    ClassRegistry, InferenceEngine, Orchestrator,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use image::{Rgb, RgbImage};
use ndarray::Array5;
use serde_json::Value;
use std::{path::Path, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "action-test-boundary";

struct FixedModel;

#[async_trait]
impl ModelService for FixedModel {
    async fn predict(&self, _input: Array5<f32>) -> Result<Vec<f32>, ModelError> {
        let mut scores = vec![0.03; 11];
        scores[4] = 0.7;
        Ok(scores)
    }
}

struct StillDecoder;

#[async_trait]
impl VideoDecoder for StillDecoder {
    type Source = InMemorySource;

    async fn probe(&self, _path: &Path) -> Result<MediaInfo, DecodeError> {
        Ok(MediaInfo {
            codec: Some("mpeg4".to_string()),
            width: Some(40),
            height: Some(30),
            fps: Some(30.0),
            duration_seconds: Some(2.0),
            total_frames: Some(60),
        })
    }

    async fn open(&self, _path: &Path, _info: &MediaInfo) -> Result<InMemorySource, DecodeError> {
        Ok(InMemorySource::new(vec![
            RgbImage::from_pixel(40, 30, Rgb([90, 120, 30]));
            60
        ]))
    }
}

struct TestApp {
    router: Router,
    _dirs: (TempDir, TempDir),
}

fn config(extra_yaml: &str) -> (Config, TempDir, TempDir) {
    let config_dir = tempfile::tempdir().unwrap();
    let upload_dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "log_level: debug\n\
         server:\n  host: 127.0.0.1\n  port: 0\n\
         model:\n  model_dir: ./model\n  onnx_file: action_recognition.onnx\n\
         upload:\n  upload_dir: {}\n{}",
        upload_dir.path().display(),
        extra_yaml
    );
    std::fs::write(config_dir.path().join("base.yaml"), yaml).unwrap();
    let config = load_configuration(config_dir.path(), Environment::Local).unwrap();
    (config, config_dir, upload_dir)
}

fn app_with(loaded: bool, extra_yaml: &str) -> TestApp {
    let (config, config_dir, upload_dir) = config(extra_yaml);
    let registry = Arc::new(ClassRegistry::ucf11());
    let engine = Arc::new(InferenceEngine::new(
        &config.model,
        &config.frames,
        registry.len(),
    ));
    if loaded {
        assert!(engine.install(FixedModel).is_ok());
    }
    let orchestrator = Orchestrator::new(&config, engine, registry, Arc::new(StillDecoder));
    let metrics = Arc::new(Metrics::new().unwrap());

    TestApp {
        router: build_router(orchestrator, metrics, &config),
        _dirs: (config_dir, upload_dir),
    }
}

fn app(loaded: bool) -> TestApp {
    app_with(loaded, "")
}

fn mp4() -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x1c];
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    data.extend_from_slice(b"isomiso2mp41");
    data.extend_from_slice(&[0u8; 128]);
    data
}

fn multipart_request(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_model_state() {
    let (status, body) = send(&app(true), get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert!(body["timestamp"].is_string());
    assert!(body["version"].is_string());

    let (status, body) = send(&app(false), get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn classes_and_model_info() {
    let app = app(true);

    let (status, classes) = send(&app, get("/api/v1/classes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(classes.as_array().unwrap().len(), 11);
    assert_eq!(classes[0]["class_index"], 0);
    assert_eq!(classes[0]["label"], "basketball");

    let (status, info) = send(&app, get("/api/v1/model/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["num_classes"], 11);
    assert_eq!(info["is_loaded"], true);
    assert_eq!(info["input_shape"]["num_frames"], 16);
    assert_eq!(info["input_shape"]["height"], 112);
}

#[tokio::test]
async fn root_lists_endpoints() {
    let (status, body) = send(&app(true), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoints"]["predict"], "/api/v1/predict");
}

#[tokio::test]
async fn predict_returns_ranked_actions() {
    let app = app(true);
    let clip = mp4();

    let (status, body) = send(
        &app,
        multipart_request("/api/v1/predict", &[("file", "riding.mp4", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["prediction"]["action"], "horse_riding");
    assert_eq!(body["prediction"]["class_index"], 4);
    assert_eq!(body["top_predictions"].as_array().unwrap().len(), 5);
    assert_eq!(body["video_info"]["filename"], "riding.mp4");
    assert_eq!(body["video_info"]["total_frames"], 60);
    assert_eq!(
        body["message"],
        "Action recognized: horse_riding (70.0% confidence)"
    );
}

#[tokio::test]
async fn predict_honours_top_k_query() {
    let clip = mp4();

    let (status, body) = send(
        &app(true),
        multipart_request("/api/v1/predict?top_k=2", &[("file", "clip.mp4", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["top_predictions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn predict_rejects_text_disguised_as_video() {
    let (status, body) = send(
        &app(true),
        multipart_request("/api/v1/predict", &[("file", "clip.mp4", b"hello world".as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "CorruptMedia");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn predict_rejects_unsupported_extension() {
    let clip = mp4();

    let (status, body) = send(
        &app(true),
        multipart_request("/api/v1/predict", &[("file", "clip.gif", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UnsupportedFormat");
}

#[tokio::test]
async fn predict_without_model_is_unavailable() {
    let clip = mp4();

    let (status, body) = send(
        &app(false),
        multipart_request("/api/v1/predict", &[("file", "clip.mp4", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "ModelNotLoaded");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn predict_requires_a_file_field() {
    let clip = mp4();
    let app = app(true);

    let (status, body) = send(
        &app,
        multipart_request("/api/v1/predict", &[("video", "clip.mp4", clip.as_slice())]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MalformedRequest");

    let not_multipart = Request::builder()
        .method("POST")
        .uri("/api/v1/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&app, not_multipart).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MalformedRequest");
}

#[tokio::test]
async fn oversized_file_is_payload_too_large() {
    let app = app_with(true, "  max_file_size_bytes: 1024\n");
    let mut clip = mp4();
    clip.resize(2048, 0);

    let (status, body) = send(
        &app,
        multipart_request("/api/v1/predict", &[("file", "clip.mp4", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "FileTooLarge");
    assert_eq!(body["detail"], "file exceeds the maximum of 1024 bytes");
}

#[tokio::test]
async fn oversized_file_is_cut_off_while_streaming() {
    let app = app_with(true, "  max_file_size_bytes: 1024\n");
    let mut clip = mp4();
    clip.resize(900 * 1024, 0);

    let (status, body) = send(
        &app,
        multipart_request("/api/v1/predict", &[("file", "clip.mp4", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "FileTooLarge");
    assert_eq!(body["detail"], "file exceeds the maximum of 1024 bytes");
}

#[tokio::test]
async fn single_predict_body_is_capped_near_one_file() {
    let app = app_with(true, "  max_file_size_bytes: 1024\n");
    let clip = vec![0u8; 3 * 1024 * 1024];

    // The part is not named `file`, so only the route body limit can stop it.
    let (status, body) = send(
        &app,
        multipart_request("/api/v1/predict", &[("padding", "pad.bin", clip.as_slice())]),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "FileTooLarge");
}

#[tokio::test]
async fn batch_reports_an_oversized_item_in_place() {
    let app = app_with(true, "  max_file_size_bytes: 1024\n");
    let clip = mp4();
    let big = vec![0u8; 4096];

    let (status, body) = send(
        &app,
        multipart_request(
            "/api/v1/predict/batch",
            &[
                ("files", "first.mp4", clip.as_slice()),
                ("files", "huge.mp4", big.as_slice()),
                ("files", "third.mp4", clip.as_slice()),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_videos"], 3);
    assert_eq!(body["successful"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["success"], false);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["filename"], "first.mp4");
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["filename"], "huge.mp4");
    assert_eq!(results[1]["error"], "FileTooLarge");
    assert_eq!(results[2]["filename"], "third.mp4");
    assert_eq!(results[2]["success"], true);
}

#[tokio::test]
async fn batch_keeps_order_and_isolates_failures() {
    let clip = mp4();

    let (status, body) = send(
        &app(true),
        multipart_request(
            "/api/v1/predict/batch",
            &[
                ("files", "a.mp4", clip.as_slice()),
                ("files", "b.mp4", b"corrupted".as_slice()),
                ("files", "c.mp4", clip.as_slice()),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["total_videos"], 3);
    assert_eq!(body["successful"], 2);
    assert_eq!(body["failed"], 1);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["filename"], "a.mp4");
    assert_eq!(results[0]["top_predictions"].as_array().unwrap().len(), 3);
    assert_eq!(results[1]["filename"], "b.mp4");
    assert_eq!(results[1]["error"], "CorruptMedia");
    assert_eq!(results[2]["filename"], "c.mp4");
    assert_eq!(results[2]["success"], true);
}

#[tokio::test]
async fn batch_limits() {
    let clip = mp4();
    let app = app(true);

    let (status, body) = send(&app, multipart_request("/api/v1/predict/batch", &[])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MalformedRequest");

    let parts: Vec<(&str, &str, &[u8])> = (0..11).map(|_| ("files", "clip.mp4", clip.as_slice())).collect();
    let (status, body) = send(&app, multipart_request("/api/v1/predict/batch", &parts)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MalformedRequest");

    let (status, body) = send(
        &app_with(false, ""),
        multipart_request("/api/v1/predict/batch", &[("files", "clip.mp4", clip.as_slice())]),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "ModelNotLoaded");
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let app = app(true);
    send(&app, get("/api/v1/health")).await;

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("requests_total"));
}
