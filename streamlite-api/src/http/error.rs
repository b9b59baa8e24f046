// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    message: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            message: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<streamlite_core::Error> for AppError {
    fn from(err: streamlite_core::Error) -> Self {
        use streamlite_core::Error;

        match err {
            Error::Unauthorized(msg) => Self::unauthorized(msg),
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Conflict(msg) => Self::conflict(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Muted(msg) => Self::forbidden(format!("User is muted: {msg}")),
            Error::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                Self::internal("Service temporarily unavailable")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                Self::internal("Internal server error")
            }
            Error::ConnectionClosed(msg) | Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamlite_core::Error;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Unauthorized(String::new()), StatusCode::UNAUTHORIZED),
            (Error::NotFound(String::new()), StatusCode::NOT_FOUND),
            (Error::Conflict(String::new()), StatusCode::CONFLICT),
            (Error::InvalidInput(String::new()), StatusCode::BAD_REQUEST),
            (Error::Muted(String::new()), StatusCode::FORBIDDEN),
            (Error::Internal(String::new()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_redacted() {
        let err = AppError::from(Error::Internal("db password leaked".to_string()));
        assert_eq!(err.message, "Internal server error");
    }
}
