use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("model api error: {0}")]
    Api(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{step} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        last: String,
    },
}

pub type Result<T> = std::result::Result<T, StoryError>;

impl StoryError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoryError::Validation(_) => StatusCode::BAD_REQUEST,
            StoryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            StoryError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoryError::NotFound(_) => StatusCode::NOT_FOUND,
            StoryError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            StoryError::Api(_)
            | StoryError::Storage(_)
            | StoryError::Config(_)
            | StoryError::Serialization(_)
            | StoryError::RetriesExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short category used as the `error` field of JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StoryError::Validation(_) => "validation error",
            StoryError::Unauthorized(_) => "unauthorized",
            StoryError::Forbidden(_) => "forbidden",
            StoryError::NotFound(_) => "not found",
            StoryError::RateLimited(_) => "rate limited",
            StoryError::Api(_) => "model api error",
            StoryError::Storage(_) => "storage error",
            StoryError::Config(_) => "configuration error",
            StoryError::Serialization(_) => "serialization error",
            StoryError::RetriesExhausted { .. } => "generation failed",
        }
    }

    pub fn details(&self) -> String {
        match self {
            StoryError::Validation(d)
            | StoryError::Unauthorized(d)
            | StoryError::Forbidden(d)
            | StoryError::NotFound(d)
            | StoryError::RateLimited(d)
            | StoryError::Api(d)
            | StoryError::Storage(d)
            | StoryError::Config(d)
            | StoryError::Serialization(d) => d.clone(),
            StoryError::RetriesExhausted { .. } => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoryError {
    fn from(err: serde_json::Error) -> Self {
        StoryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoryError {
    fn from(err: std::io::Error) -> Self {
        StoryError::Storage(err.to_string())
    }
}

impl IntoResponse for StoryError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "details": self.details(),
        }));
        (self.status(), body).into_response()
    }
}
