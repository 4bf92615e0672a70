use async_trait::async_trait;
use ndarray::Array5;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("failed to build tensor: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("failed to extract tensor: {0}")]
    Output(String),
}

/// Runs the classifier on one clip tensor and returns the flat score vector.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(&self, input: Array5<f32>) -> Result<Vec<f32>, ModelError>;
}
