//! Transport completion payload and status classification.
//!
//! Every cloud adapter maps an [`HttpResponse`] onto a [`ResponseClass`]
//! with [`classify`]; the class decides whether the request pipeline pops,
//! retries or rejects the task.

use thiserror::Error;

/// Engine-level failure of a transfer (no HTTP status was obtained).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transfer timed out")]
    Timeout,

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request could not be built: {0}")]
    InvalidRequest(String),

    #[error("Transport shut down before the transfer completed")]
    Shutdown,

    #[error("Transfer failed: {0}")]
    Other(String),
}

/// Result of one transport call, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// `Ok(())` when the engine completed the exchange (any HTTP status).
    pub outcome: Result<(), TransferError>,
    /// HTTP status code; 0 when `outcome` is an error.
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn completed(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            outcome: Ok(()),
            status,
            body: body.into(),
        }
    }

    pub fn failed(error: TransferError) -> Self {
        Self {
            outcome: Err(error),
            status: 0,
            body: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok() && self.status == 200
    }

    /// Body decoded lossily as UTF-8, for diagnostics.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Human-readable summary used as a "last error" string.
    pub fn describe(&self) -> String {
        match &self.outcome {
            Err(e) => e.to_string(),
            Ok(()) if self.body.is_empty() => format!("HTTP {}", self.status),
            Ok(()) => format!(
                "HTTP {}: {}",
                self.status,
                crate::util::preview(&self.body_text(), 512)
            ),
        }
    }
}

/// How an adapter should treat a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// HTTP 200.
    Success,
    /// HTTP 401: credential invalid or expired.
    Unauthorized,
    /// Other 4xx: well-formed but rejected, not retried.
    Rejected,
    /// Engine failure, 5xx or any other unexpected status.
    Transient,
}

impl ResponseClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResponseClass::Unauthorized | ResponseClass::Transient)
    }
}

/// Classify a response according to the shared adapter status policy.
pub fn classify(response: &HttpResponse) -> ResponseClass {
    if response.outcome.is_err() {
        return ResponseClass::Transient;
    }
    match response.status {
        200 => ResponseClass::Success,
        401 => ResponseClass::Unauthorized,
        400..=499 => ResponseClass::Rejected,
        _ => ResponseClass::Transient,
    }
}
