//! Use cases
//!
//! The cloud adapters. Each owns one request pipeline and shares the
//! transport through the [`HttpClient`](crate::ports::http_client::HttpClient) port.

pub mod chat_completion;
pub(crate) mod shared;
pub mod speech_to_text;
pub mod text_to_speech;
