//! Speech service payloads.
//!
//! Audio buffers themselves are opaque bytes; only the request/response
//! envelopes are modelled here.

pub mod recognition;
pub mod ssml;

pub use recognition::RecognitionResult;
pub use ssml::{build_ssml, escape_xml};
