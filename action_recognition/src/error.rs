use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Failures a prediction request can end in. The message is safe to return
/// to callers: it never contains filesystem paths or tool output.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("file size {size_bytes} bytes exceeds the maximum of {limit_bytes} bytes")]
    FileTooLarge { size_bytes: u64, limit_bytes: u64 },
    #[error("{0}")]
    UnsupportedFormat(String),
    #[error("{0}")]
    CorruptMedia(String),
    #[error("frame extraction failed: {0}")]
    FrameExtraction(String),
    #[error("frame extraction timed out after {} ms", .0.as_millis())]
    DecodeTimeout(Duration),
    #[error("model is not loaded, please retry later")]
    ModelNotLoaded,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference timed out after {} ms", .0.as_millis())]
    InferenceTimeout(Duration),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            PipelineError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            PipelineError::CorruptMedia(_) => ErrorKind::CorruptMedia,
            PipelineError::FrameExtraction(_) | PipelineError::DecodeTimeout(_) => {
                ErrorKind::FrameExtractionError
            }
            PipelineError::ModelNotLoaded => ErrorKind::ModelNotLoaded,
            PipelineError::Inference(_) | PipelineError::InferenceTimeout(_) => {
                ErrorKind::InferenceError
            }
            PipelineError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            PipelineError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Operational conditions a caller may retry later. Media errors are
    /// permanent for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelNotLoaded
                | PipelineError::DecodeTimeout(_)
                | PipelineError::InferenceTimeout(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PipelineError::DecodeTimeout(_) | PipelineError::InferenceTimeout(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptMedia,
    FileTooLarge,
    FrameExtractionError,
    ModelNotLoaded,
    InferenceError,
    MalformedRequest,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::CorruptMedia => "CorruptMedia",
            ErrorKind::FileTooLarge => "FileTooLarge",
            ErrorKind::FrameExtractionError => "FrameExtractionError",
            ErrorKind::ModelNotLoaded => "ModelNotLoaded",
            ErrorKind::InferenceError => "InferenceError",
            ErrorKind::MalformedRequest => "MalformedRequest",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
