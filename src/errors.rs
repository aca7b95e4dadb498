use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Request-level failures for the predict endpoint.
///
/// Every variant serializes to `{"success": false, "error": <message>}` so
/// clients see one error shape regardless of where the failure happened.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image file provided")]
    MissingImage,
    #[error("Invalid file type. Please upload an image.")]
    InvalidFileType,
    #[error("File too large. Maximum size is 10MB.")]
    FileTooLarge,
    #[error("{0}")]
    Prediction(String),
    #[error("An unexpected error occurred during processing.")]
    Unexpected,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::InvalidFileType | ApiError::FileTooLarge => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Prediction(_) | ApiError::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}
