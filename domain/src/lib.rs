//! Domain layer for puppet-link
//!
//! This crate contains the wire formats, status classification and
//! protocol parsing shared by every layer. It has no async runtime and no
//! I/O.
//!
//! # Core Concepts
//!
//! ## Dispositions
//!
//! Every cloud call ends in exactly one [`Disposition`]: advance the
//! request pipeline, retry the same task after a delay, or reject it.
//! [`classify`] maps an [`HttpResponse`] onto the shared status policy.
//!
//! ## Chat protocol
//!
//! [`Message`] parses `[@tags ][:source ]COMMAND[ params][ :trailing]` lines
//! produced by [`LineBuffer`].

pub mod chat;
pub mod completion;
pub mod core;
pub mod credential;
pub mod http;
pub mod pipeline;
pub mod speech;
pub mod util;

// Re-export commonly used types
pub use chat::{ChatEvent, LineBuffer, Message, Privmsg};
pub use completion::{ChatMessage, CompletionRequest, CompletionResponse, Role};
pub use core::error::DomainError;
pub use credential::BearerToken;
pub use http::{Headers, HttpRequest, HttpResponse, Method, ResponseClass, TransferError, classify};
pub use pipeline::{Backoff, Disposition, PipelineState};
pub use speech::{RecognitionResult, build_ssml};
