use serde::Deserialize;
use std::path::{Path, PathBuf};

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    #[serde(default)]
    pub frames: FrameConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.frames.validate()?;
        self.upload.validate()?;
        self.prediction.validate()?;
        if let Some(labels) = &self.labels {
            labels.validate()?;
        }
        Ok(())
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Memory layout of the model input tensor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `(batch, frames, height, width, channels)`, as exported from Keras.
    #[default]
    Nthwc,
    /// `(batch, channels, frames, height, width)`, as used by most PyTorch video models.
    Ncthw,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default)]
    pub use_tensorrt: bool,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
    #[serde(default)]
    pub apply_softmax: bool,
    #[serde(default)]
    pub output_name: Option<String>,
    #[serde(default)]
    pub layout: TensorLayout,
}

fn default_model_name() -> String {
    "Action Recognition CNN-LSTM (MobileNetV2)".to_string()
}

// ONNX Runtime sessions are not shared between threads; one instance means a
// single global execution gate.
fn default_model_instances() -> usize {
    1
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.onnx_file.trim().is_empty() {
            return Err("model.onnx_file must not be empty".to_string());
        }
        if self.num_instances == 0 {
            return Err("model.num_instances must be at least 1".to_string());
        }
        if self.inference_timeout_ms == 0 {
            return Err("model.inference_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_dir: PathBuf,
    pub labels_file: String,
}

impl LabelsConfig {
    pub fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Validatable for LabelsConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    pub num_frames: usize,
    pub height: u32,
    pub width: u32,
    pub channels: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Upper bound on frames buffered when the container does not report a frame count.
    pub max_decoded_frames: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            num_frames: 16,
            height: 112,
            width: 112,
            channels: 3,
            mean: [0.0; 3],
            std: [1.0; 3],
            max_decoded_frames: 4500,
        }
    }
}

impl Validatable for FrameConfig {
    fn validate(&self) -> Result<(), String> {
        if self.num_frames == 0 {
            return Err("frames.num_frames must be at least 1".to_string());
        }
        if self.height == 0 || self.width == 0 {
            return Err("frames.height and frames.width must be positive".to_string());
        }
        if self.channels != 3 {
            return Err(format!(
                "frames.channels is {} but frames are sampled as RGB (3 channels)",
                self.channels
            ));
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err("frames.std values must be finite and positive".to_string());
        }
        if self.max_decoded_frames < self.num_frames {
            return Err("frames.max_decoded_frames must be at least frames.num_frames".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub upload_dir: PathBuf,
    pub decode_timeout_ms: u64,
    pub max_batch_size: usize,
    pub batch_concurrency: usize,
    /// Largest `width * height` accepted from the probed stream header.
    pub max_frame_pixels: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_extensions: [".mp4", ".avi", ".mov", ".mkv", ".mpg", ".mpeg", ".webm"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            upload_dir: std::env::temp_dir().join("action_recognition_uploads"),
            decode_timeout_ms: 60_000,
            max_batch_size: 10,
            batch_concurrency: 2,
            max_frame_pixels: 4096 * 4096,
        }
    }
}

impl UploadConfig {
    /// Whether `extension` (with or without the leading dot) is on the allow-list.
    pub fn allows_extension(&self, extension: &str) -> bool {
        let wanted = extension.trim_start_matches('.');
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(wanted))
    }
}

impl Validatable for UploadConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_file_size_bytes == 0 {
            return Err("upload.max_file_size_bytes must be positive".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("upload.allowed_extensions must not be empty".to_string());
        }
        if self.decode_timeout_ms == 0 {
            return Err("upload.decode_timeout_ms must be positive".to_string());
        }
        if self.max_batch_size == 0 || self.batch_concurrency == 0 {
            return Err(
                "upload.max_batch_size and upload.batch_concurrency must be at least 1".to_string(),
            );
        }
        if self.max_frame_pixels == 0 {
            return Err("upload.max_frame_pixels must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictionConfig {
    pub default_top_k: usize,
    pub batch_top_k: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            batch_top_k: 3,
        }
    }
}

impl Validatable for PredictionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.default_top_k == 0 || self.batch_top_k == 0 {
            return Err("prediction top-k values must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("cannot resolve current dir: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&configuration_directory, environment)
}

/// Layers `base.yaml`, the environment file and `APP_*` variables from `directory`.
pub fn load_configuration(
    directory: &Path,
    environment: Environment,
) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(directory.join("base.yaml")))
        .add_source(
            config::File::from(directory.join(format!("{}.yaml", environment.as_str())))
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = settings.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}
