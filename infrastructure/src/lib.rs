//! Infrastructure layer for puppet-link
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer:
//!
//! - [`reactor`]: single-threaded event loop (timers, hooks, sockets, polls)
//! - [`transport`]: non-blocking HTTP client bridging a multiplexing engine
//! - [`chat`]: line-protocol chat connection
//! - [`config`]: configuration file loading and merging

pub mod chat;
pub mod config;
pub mod reactor;
pub mod transport;

// Re-export commonly used types
pub use chat::{ChatClient, ChatError, ChatOptions, ChatSender, ChatState};
pub use config::{ConfigError, ConfigIssue, ConfigLoader, ConfigSource, FileConfig, Severity};
pub use reactor::{Reactor, ReactorError, ReactorHandle};
pub use transport::{ReqwestEngine, Transport, TransportError, TransportOptions};
