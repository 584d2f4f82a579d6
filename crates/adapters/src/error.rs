use reqwest::StatusCode;
use thiserror::Error;

use storyforge_core::{EmbeddingInputError, EmbeddingModelError, LanguageModelError};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid embedding input: {0}")]
    InvalidInput(#[from] EmbeddingInputError),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("API returned an empty response")]
    EmptyResponse,
    #[error("API returned {actual} vectors for {expected} inputs")]
    VectorCount { expected: usize, actual: usize },
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Whether a later attempt of the same request may succeed: network
    /// failures, rate limiting and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::HttpStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            Self::EmptyResponse => true,
            Self::Json(_)
            | Self::InvalidConfig(_)
            | Self::InvalidInput(_)
            | Self::RetryExhausted { .. }
            | Self::VectorCount { .. } => false,
        }
    }

    fn is_malformed(&self) -> bool {
        match self {
            Self::Json(_) | Self::EmptyResponse | Self::VectorCount { .. } => true,
            Self::RetryExhausted { source, .. } => source.is_malformed(),
            _ => false,
        }
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        if err.is_malformed() {
            LanguageModelError::malformed(err)
        } else {
            LanguageModelError::new(err)
        }
    }
}

impl From<AdapterError> for EmbeddingModelError {
    fn from(err: AdapterError) -> Self {
        EmbeddingModelError::new(err)
    }
}
