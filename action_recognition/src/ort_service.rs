use crate::{
    config::ModelConfig,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use ndarray::Array5;
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// A pool of ONNX Runtime sessions over the same model file. Requests are
/// spread round-robin; each session runs one inference at a time.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: Option<String>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        if model_config.use_tensorrt {
            ort::init()
                .with_execution_providers([TensorRTExecutionProvider::default()
                    .with_engine_cache(true)
                    .build()])
                .commit()
                .map_err(|e| ModelError::Load(e.to_string()))?;
        }

        let path = model_config.get_path();
        if !path.exists() {
            return Err(ModelError::Load(format!("model file not found: {:?}", path)));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name: model_config.output_name.clone(),
        })
    }

    pub fn run_inference(&self, input: &Array5<f32>) -> Result<Vec<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref =
            TensorRef::from_array_view(input_view).map_err(|e| ModelError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Run(e.to_string()))?;

        let output = match &self.output_name {
            Some(name) => require_output(outputs.get(name.as_str()), name)?,
            None => &outputs[0],
        };
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;

        tracing::debug!(shape = ?shape, "model output extracted");
        Ok(data.to_vec())
    }
}

/// A misnamed output must not panic while the session lock is held.
fn require_output<'a, T: ?Sized>(output: Option<&'a T>, name: &str) -> Result<&'a T, ModelError> {
    output.ok_or_else(|| ModelError::Output(format!("model has no output named {:?}", name)))
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, input: Array5<f32>) -> Result<Vec<f32>, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.run_inference(&input))
            .await
            .map_err(|e| ModelError::Run(format!("inference task failed: {}", e)))?
    }
}
