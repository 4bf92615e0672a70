pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod model_service;
pub mod orchestrator;
pub mod ort_service;
pub mod registry;
pub mod response;
pub mod sampler;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{InferenceEngine, ProbabilityVector};
pub use error::{ErrorKind, PipelineError};
pub use model_service::{ModelError, ModelService};
pub use orchestrator::{Orchestrator, Stage};
pub use ort_service::OrtModelService;
pub use registry::ClassRegistry;
pub use video::{FfmpegDecoder, Upload};
