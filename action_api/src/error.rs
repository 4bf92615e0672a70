use action_recognition::{response::ErrorDetail, ErrorKind};
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// An `ErrorDetail` sent back with the status code for its kind.
#[derive(Debug)]
pub struct ApiError(pub ErrorDetail);

impl ApiError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self(ErrorDetail::new(ErrorKind::MalformedRequest, detail))
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

impl From<ErrorDetail> for ApiError {
    fn from(detail: ErrorDetail) -> Self {
        Self(detail)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self(ErrorDetail::new(
                ErrorKind::FileTooLarge,
                "request body exceeds the upload limit",
            ))
        } else {
            Self::malformed(err.body_text())
        }
    }
}

/// Timeouts surface as retryable extraction or inference errors.
pub fn status_for(detail: &ErrorDetail) -> StatusCode {
    match (detail.error, detail.retryable) {
        (ErrorKind::ModelNotLoaded, _) => StatusCode::SERVICE_UNAVAILABLE,
        (ErrorKind::FrameExtractionError | ErrorKind::InferenceError, true) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        (ErrorKind::UnsupportedFormat | ErrorKind::CorruptMedia | ErrorKind::FrameExtractionError, _) => {
            StatusCode::BAD_REQUEST
        }
        (ErrorKind::FileTooLarge, _) => StatusCode::PAYLOAD_TOO_LARGE,
        (ErrorKind::MalformedRequest, _) => StatusCode::UNPROCESSABLE_ENTITY,
        (ErrorKind::InferenceError | ErrorKind::InternalError, _) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0.error, "{}", self.0.detail);
        }
        (status, Json(self.0)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_recognition::PipelineError;
    use std::time::Duration;

    fn status(err: PipelineError) -> StatusCode {
        status_for(&ErrorDetail::from(err))
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status(PipelineError::UnsupportedFormat("gif".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(PipelineError::CorruptMedia("text".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(PipelineError::FrameExtraction("decode".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(PipelineError::FileTooLarge {
                size_bytes: 2,
                limit_bytes: 1
            }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(PipelineError::MalformedRequest("no file".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(PipelineError::ModelNotLoaded),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(PipelineError::DecodeTimeout(Duration::from_secs(60))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(PipelineError::InferenceTimeout(Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(PipelineError::Inference("nan".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(PipelineError::Internal("join".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
