//! Line-oriented chat protocol (IRC / Twitch chat).
//!
//! - [`message::Message`]: tag/source/command/params record and its parser
//! - [`line_buffer::LineBuffer`]: byte accumulator yielding complete lines
//! - [`event::ChatEvent`]: what the connection reports to its owner

pub mod event;
pub mod line_buffer;
pub mod message;

pub use event::{ChatEvent, Privmsg};
pub use line_buffer::LineBuffer;
pub use message::Message;
