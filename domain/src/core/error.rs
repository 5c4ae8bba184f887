//! Domain error types

use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::MalformedPayload(e.to_string())
    }
}
