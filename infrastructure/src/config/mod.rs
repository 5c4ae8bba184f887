//! Configuration file loading for puppet-link
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `PUPPET_*` environment variables (`__` separates sections)
//! 2. `--config <path>` specified file
//! 3. Project root: `./puppet.toml` or `./.puppet.toml`
//! 4. Global: `<config dir>/puppet-link/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigIssue, FileChatConfig, FileCompletionConfig, FileConfig, FilePipelineConfig,
    FileSpeechConfig, FileTransportConfig, Severity,
};
pub use loader::{ConfigError, ConfigLoader, ConfigSource};
