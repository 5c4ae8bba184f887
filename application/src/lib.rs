//! Application layer for puppet-link
//!
//! This crate contains the request pipeline, the credential broker, the
//! cloud adapters and the port definitions they are written against.
//! It depends only on the domain layer and has no async runtime: the
//! infrastructure layer supplies the event loop and HTTP transport
//! through [`ports`].

pub mod config;
pub mod credential;
pub mod pipeline;
pub mod ports;
pub mod use_cases;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{CompletionSettings, PipelineSettings, SpeechSettings};
pub use credential::{CredentialBroker, StaticCredential};
pub use pipeline::{DEFAULT_RETRY_DELAY, RequestPipeline, Resolver};
pub use ports::{
    credential_source::{CredentialCallback, CredentialError, CredentialSource},
    http_client::{HttpCallback, HttpClient},
    scheduler::{Scheduler, TimerHandle},
};
pub use use_cases::chat_completion::ChatCompletion;
pub use use_cases::speech_to_text::SpeechToText;
pub use use_cases::text_to_speech::TextToSpeech;
