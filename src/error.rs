use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facemark_vision::AnnotateError;
use serde_json::json;
use thiserror::Error;

/// Everything the annotation endpoint can answer besides an image.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no file")]
    NoFile,

    #[error("no filename")]
    NoFilename,

    #[error("file too large")]
    TooLarge,

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{0}")]
    Decode(String),

    #[error("no faces found")]
    NoFaces,

    #[error("could not process image")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<AnnotateError> for ApiError {
    fn from(err: AnnotateError) -> Self {
        match err {
            AnnotateError::Decode(e) => Self::Decode(e.to_string()),
            AnnotateError::NoFaces => Self::NoFaces,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(detail) => log::error!("request failed: {detail}"),
            other => log::warn!("rejected request: {other}"),
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
