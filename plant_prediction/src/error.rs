use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ERROR_CODE_HEADER: HeaderName = HeaderName::from_static("x-error-code");

/// Everything that can go wrong while classifying one upload.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("No image uploaded")]
    MissingImage,
    #[error("upload exceeds the body limit: {0}")]
    PayloadTooLarge(String),
    #[error("failed to read upload: {0}")]
    Upload(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("unexpected tensor shape: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("class index {index} is outside the {num_classes} known labels")]
    UnknownClass { index: usize, num_classes: usize },
}

impl ClassifyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ClassifyError::MissingImage => StatusCode::BAD_REQUEST,
            ClassifyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ClassifyError::MissingImage => "missing_image",
            ClassifyError::PayloadTooLarge(_) => "upload_too_large",
            ClassifyError::Upload(_) => "upload_unreadable",
            ClassifyError::Decode(_) => "invalid_image",
            ClassifyError::ShapeMismatch { .. } => "shape_mismatch",
            ClassifyError::Inference(_) => "inference_failed",
            ClassifyError::UnknownClass { .. } => "unknown_class",
        }
    }

    /// Text sent to the client. Internal details only go to the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            ClassifyError::MissingImage => "No image uploaded",
            ClassifyError::PayloadTooLarge(_) => "Uploaded image is too large",
            ClassifyError::Upload(_) => "Upload could not be read",
            ClassifyError::Decode(_) => "Uploaded file is not a readable image",
            ClassifyError::ShapeMismatch { .. } => "Model input or output has an unexpected shape",
            ClassifyError::Inference(_) => "Inference failed",
            ClassifyError::UnknownClass { .. } => "Model predicted an unknown class",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Classification failed: {}", self);
        } else {
            tracing::warn!(code = self.code(), "Rejected request: {}", self);
        }

        let body = ErrorBody {
            error: self.public_message().to_string(),
        };
        (
            status,
            [(ERROR_CODE_HEADER, HeaderValue::from_static(self.code()))],
            Json(body),
        )
            .into_response()
    }
}
