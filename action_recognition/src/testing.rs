//! Doubles for the decoder and model seams, shared by unit tests.

use crate::{
    config::{
        Config, CorsConfig, FfmpegConfig, FrameConfig, LogLevel, ModelConfig, PredictionConfig,
        ServerConfig, TensorLayout, UploadConfig,
    },
    model_service::{ModelError, ModelService},
    sampler::FrameBatch,
    video::{DecodeError, FrameSource, MediaInfo, VideoDecoder},
};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use ndarray::Array5;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Leading bytes of an ISO base media file.
pub(crate) fn mp4_bytes() -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x20];
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    data.extend_from_slice(b"isomiso2avc1mp41");
    data.extend_from_slice(&[0u8; 64]);
    data
}

pub(crate) fn model_config() -> ModelConfig {
    ModelConfig {
        model_dir: PathBuf::from("model"),
        onnx_file: "action_recognition.onnx".to_string(),
        name: "test model".to_string(),
        num_instances: 1,
        use_tensorrt: false,
        inference_timeout_ms: 5_000,
        apply_softmax: false,
        output_name: None,
        layout: TensorLayout::Nthwc,
    }
}

pub(crate) fn config(upload_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        log_level: LogLevel::Debug,
        model: model_config(),
        labels: None,
        frames: FrameConfig::default(),
        upload: UploadConfig {
            upload_dir: upload_dir.to_path_buf(),
            ..UploadConfig::default()
        },
        prediction: PredictionConfig::default(),
        ffmpeg: FfmpegConfig::default(),
        cors: CorsConfig::default(),
    }
}

pub(crate) fn frame_batch() -> FrameBatch {
    let config = FrameConfig::default();
    let frames = vec![RgbImage::from_pixel(config.width, config.height, Rgb([128, 64, 32])); config.num_frames];
    FrameBatch::from_frames(&frames, &config).unwrap()
}

#[derive(Clone)]
pub(crate) struct MockModel {
    scores: Vec<f32>,
    delay: Option<Duration>,
    fail: bool,
    last_shape: Arc<Mutex<Option<Vec<usize>>>>,
}

impl MockModel {
    pub(crate) fn returning(scores: Vec<f32>) -> Self {
        Self {
            scores,
            delay: None,
            fail: false,
            last_shape: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::returning(Vec::new())
        }
    }

    pub(crate) fn slow(scores: Vec<f32>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::returning(scores)
        }
    }

    pub(crate) fn last_input_shape(&self) -> Option<Vec<usize>> {
        self.last_shape.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelService for MockModel {
    async fn predict(&self, input: Array5<f32>) -> Result<Vec<f32>, ModelError> {
        *self.last_shape.lock().unwrap() = Some(input.shape().to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ModelError::Run("mock failure".to_string()));
        }
        Ok(self.scores.clone())
    }
}

/// Pretends every probed file holds `frames` frames of 32x24 video unless
/// other dimensions are set.
#[derive(Clone)]
pub(crate) struct MockDecoder {
    frames: usize,
    probe_fails: bool,
    frame_delay: Option<Duration>,
    dimensions: (u32, u32),
    probes: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl MockDecoder {
    pub(crate) fn with_frames(frames: usize) -> Self {
        Self {
            frames,
            probe_fails: false,
            frame_delay: None,
            dimensions: (32, 24),
            probes: Arc::new(AtomicUsize::new(0)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing_probe() -> Self {
        Self {
            probe_fails: true,
            ..Self::with_frames(0)
        }
    }

    pub(crate) fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    pub(crate) fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = (width, height);
        self
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoDecoder for MockDecoder {
    type Source = MockSource;

    async fn probe(&self, _path: &Path) -> Result<MediaInfo, DecodeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_fails {
            return Err(DecodeError::NoVideoStream);
        }
        Ok(MediaInfo {
            codec: Some("h264".to_string()),
            width: Some(self.dimensions.0),
            height: Some(self.dimensions.1),
            fps: Some(30.0),
            duration_seconds: Some(self.frames as f64 / 30.0),
            total_frames: Some(self.frames).filter(|n| *n > 0),
        })
    }

    async fn open(&self, _path: &Path, info: &MediaInfo) -> Result<MockSource, DecodeError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockSource {
            next: 0,
            total: self.frames,
            hint: info.total_frames,
            delay: self.frame_delay,
        })
    }
}

pub(crate) struct MockSource {
    next: usize,
    total: usize,
    hint: Option<usize>,
    delay: Option<Duration>,
}

#[async_trait]
impl FrameSource for MockSource {
    fn frame_count_hint(&self) -> Option<usize> {
        self.hint
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.next >= self.total {
            return Ok(None);
        }
        let level = (self.next % 256) as u8;
        self.next += 1;
        Ok(Some(RgbImage::from_pixel(32, 24, Rgb([level, level, level]))))
    }
}
