//! Line-protocol chat connection (IRC / Twitch chat).

mod client;

pub use client::{ChatClient, ChatError, ChatOptions, ChatSender, ChatState};
