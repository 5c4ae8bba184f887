//! Credential source port
//!
//! Anything that can hand a bearer token to a pipeline before a task runs.

use puppet_domain::BearerToken;
use thiserror::Error;

/// Why a credential could not be provided.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Token request failed: {0}")]
    Fetch(String),

    #[error("Token endpoint returned an empty token")]
    EmptyToken,

    #[error("No API key configured")]
    MissingKey,
}

pub type CredentialCallback = Box<dyn FnOnce(Result<BearerToken, CredentialError>)>;

pub trait CredentialSource {
    /// Deliver a token (or an error) through the event loop.
    fn get(&self, callback: CredentialCallback);

    /// Forget the current token after an authentication failure.
    fn invalidate(&self);
}
