//! Application-level configuration.
//!
//! Runtime settings consumed by the adapters. The infrastructure layer
//! builds these from the configuration file:
//!
//! - [`SpeechSettings`]: region, key, voice for the speech services
//! - [`CompletionSettings`]: endpoint, key and model for chat completion
//! - [`PipelineSettings`]: retry behaviour shared by every pipeline

pub mod completion;
pub mod pipeline;
pub mod speech;

pub use completion::CompletionSettings;
pub use pipeline::PipelineSettings;
pub use speech::SpeechSettings;
