use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid custom code")]
    InvalidCustomCode,
    #[error("custom code already exists")]
    CustomCodeExists,
    #[error("short link not found")]
    NotFound,
    #[error("short link expired")]
    Expired,
    #[error("maximum visits limit reached")]
    MaxVisitsReached,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("cache error: {0}")]
    Cache(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// JSON error body returned by every endpoint. The `code` field follows the
/// `<HTTP-status>NNN` convention (e.g. 404001).
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
    pub details: String,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidUrl(_) | Error::InvalidCustomCode | Error::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::CustomCodeExists => StatusCode::CONFLICT,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Expired => StatusCode::GONE,
            Error::MaxVisitsReached => StatusCode::FORBIDDEN,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Cache(_) | Error::Database(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidUrl(_) => 400_001,
            Error::InvalidCustomCode => 400_002,
            Error::InvalidInput(_) => 400_004,
            Error::CustomCodeExists => 409_001,
            Error::NotFound => 404_001,
            Error::Expired => 410_001,
            Error::MaxVisitsReached => 403_001,
            Error::RateLimited => 429_001,
            Error::Cache(_) | Error::Database(_) | Error::Other(_) => 500_001,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "invalid URL",
            Error::InvalidCustomCode => "invalid custom code",
            Error::InvalidInput(_) => "invalid request parameters",
            Error::CustomCodeExists => "custom code already in use",
            Error::NotFound => "short link not found",
            Error::Expired => "short link expired",
            Error::MaxVisitsReached => "visit limit reached",
            Error::RateLimited => "too many requests",
            Error::Cache(_) | Error::Database(_) | Error::Other(_) => "internal server error",
        }
    }

    fn details(&self) -> String {
        match self {
            Error::InvalidUrl(detail) => {
                format!("the URL must start with http:// or https://: {detail}")
            }
            Error::InvalidCustomCode => {
                "codes are 4-16 characters of letters, digits, underscore or dash".to_string()
            }
            Error::InvalidInput(detail) => detail.clone(),
            Error::CustomCodeExists => {
                "pick a different code or let the service generate one".to_string()
            }
            Error::NotFound => "the code does not exist or the link was deleted".to_string(),
            Error::Expired => "the link is past its expiration time".to_string(),
            Error::MaxVisitsReached => "the link reached its configured visit cap".to_string(),
            Error::RateLimited => "slow down and retry shortly".to_string(),
            // Internal failure details stay in the logs, not on the wire.
            Error::Cache(_) | Error::Database(_) | Error::Other(_) => {
                "please retry later".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.message().to_string(),
            details: self.details(),
        };
        (self.status(), Json(body)).into_response()
    }
}
