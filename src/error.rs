//! Error handling for Vigil Camserver

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error (startup faults are fatal)
    #[error("Config error: {0}")]
    Config(String),

    /// Camera source error
    #[error("Camera error: {0}")]
    Camera(String),

    /// Face / object inference collaborator error
    #[error("Inference error: {0}")]
    Inference(String),

    /// Known-identity gallery error
    #[error("Gallery error: {0}")]
    Gallery(String),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Alarm delivery error
    #[error("Alarm error: {0}")]
    Alarm(String),

    /// Image codec error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Camera(msg) => (StatusCode::SERVICE_UNAVAILABLE, "CAMERA_ERROR", msg.clone()),
            Error::Inference(msg) => (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", msg.clone()),
            Error::Gallery(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "GALLERY_ERROR",
                msg.clone(),
            ),
            Error::Storage(msg) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR", msg.clone()),
            Error::Alarm(msg) => (StatusCode::BAD_GATEWAY, "ALARM_ERROR", msg.clone()),
            Error::Image(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_ERROR",
                e.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
