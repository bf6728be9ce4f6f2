use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: StatusCode) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code: code.as_u16(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidRequest(_) => Self::new("bad_request", &message, StatusCode::BAD_REQUEST),
            Error::Validation(_) => {
                Self::new("validation_error", &message, StatusCode::UNPROCESSABLE_ENTITY)
            }
            Error::NotFound(_) => Self::new("not_found", &message, StatusCode::NOT_FOUND),
            Error::RateLimitExceeded => Self::new(
                "rate_limit_exceeded",
                "Request rate limit exceeded",
                StatusCode::TOO_MANY_REQUESTS,
            ),
            Error::Configuration(_) | Error::Dataset(_) | Error::Io(_) | Error::Decode(_) => {
                Self::new("internal_error", &message, StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        (body.status(), Json(body)).into_response()
    }
}
