use poem::{http::StatusCode, IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::prediction::Prediction;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Method not allowed. Use POST.")]
    MethodNotAllowed,

    #[error("Missing {0}")]
    MissingCredential(&'static str),

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("No image provided")]
    NoImage,

    #[error("Invalid imageUrl")]
    InvalidImageUrl,

    #[error("Invalid image data")]
    InvalidImage,

    #[error("Invalid multipart body: {0}")]
    InvalidMultipart(String),

    #[error("Invalid prediction id")]
    InvalidPredictionId,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Unsupported(&'static str),

    /// Non-2xx answer from the vendor API, message taken from its body.
    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        payload: Value,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    PredictionFailed {
        message: String,
        prediction: Box<Prediction>,
    },

    #[error("Prediction timed out")]
    Timeout { prediction: Box<Prediction> },

    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Internal(String),
}

impl GenerateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GenerateError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GenerateError::InvalidJson
            | GenerateError::NoImage
            | GenerateError::InvalidImageUrl
            | GenerateError::InvalidImage
            | GenerateError::InvalidMultipart(_)
            | GenerateError::InvalidPredictionId => StatusCode::BAD_REQUEST,
            GenerateError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GenerateError::Unsupported(_) => StatusCode::NOT_FOUND,
            GenerateError::Upstream { .. }
            | GenerateError::Transport(_)
            | GenerateError::PredictionFailed { .. }
            | GenerateError::Malformed(_) => StatusCode::BAD_GATEWAY,
            GenerateError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GenerateError::MissingCredential(_) | GenerateError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        Response::builder()
            .status(self.status())
            .content_type("application/json")
            .body(json!({ "error": self.to_string() }).to_string())
    }
}
