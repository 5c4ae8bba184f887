//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! Each section converts into the runtime settings of the layer that
//! consumes it.

mod chat;
mod completion;
mod speech;
mod transport;

pub use chat::FileChatConfig;
pub use completion::FileCompletionConfig;
pub use speech::FileSpeechConfig;
pub use transport::{FilePipelineConfig, FileTransportConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Speech-to-text / text-to-speech service
    pub speech: FileSpeechConfig,
    /// Chat-completion service
    pub completion: FileCompletionConfig,
    /// Chat connection
    pub chat: FileChatConfig,
    /// HTTP transport limits
    pub transport: FileTransportConfig,
    /// Retry behaviour of the request pipelines
    pub pipeline: FilePipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One problem found by [`FileConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: Severity,
    /// Dotted field path, e.g. `chat.channel`.
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", level, self.field, self.message)
    }
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    ///
    /// Missing secrets are warnings: each command only needs the services
    /// it talks to.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.speech.region.trim().is_empty() && self.speech.token_endpoint.is_none() {
            issues.push(ConfigIssue::error(
                "speech.region",
                "region is empty and no token_endpoint is set",
            ));
        }
        if self.speech.subscription_key().is_none() {
            issues.push(ConfigIssue::warning(
                "speech.subscription_key",
                format!(
                    "no subscription key (set it or ${})",
                    self.speech.subscription_key_env
                ),
            ));
        }

        if self.completion.model.trim().is_empty() {
            issues.push(ConfigIssue::error("completion.model", "model name cannot be empty"));
        }
        if self.completion.max_tokens == Some(0) {
            issues.push(ConfigIssue::error("completion.max_tokens", "max_tokens cannot be 0"));
        }
        if let Some(t) = self.completion.temperature
            && !(0.0..=2.0).contains(&t)
        {
            issues.push(ConfigIssue::error(
                "completion.temperature",
                format!("temperature {} is outside 0.0..=2.0", t),
            ));
        }
        if self.completion.api_key().is_none() {
            issues.push(ConfigIssue::warning(
                "completion.api_key",
                format!("no API key (set it or ${})", self.completion.api_key_env),
            ));
        }

        if !self.chat.server.contains(':') {
            issues.push(ConfigIssue::error(
                "chat.server",
                format!("'{}' is not host:port", self.chat.server),
            ));
        }
        if self.chat.keepalive_seconds == 0 {
            issues.push(ConfigIssue::error("chat.keepalive_seconds", "keep-alive cannot be 0"));
        }
        if self.chat.reconnect_initial_seconds == 0 {
            issues.push(ConfigIssue::error(
                "chat.reconnect_initial_seconds",
                "initial reconnect delay cannot be 0",
            ));
        }

        if self.transport.request_timeout_seconds == 0 {
            issues.push(ConfigIssue::error(
                "transport.request_timeout_seconds",
                "timeout cannot be 0",
            ));
        }
        if self.transport.connect_timeout_seconds == 0 {
            issues.push(ConfigIssue::error(
                "transport.connect_timeout_seconds",
                "timeout cannot be 0",
            ));
        }
        if self.pipeline.retry_delay_ms == 0 {
            issues.push(ConfigIssue::warning(
                "pipeline.retry_delay_ms",
                "retrying without delay hammers the service",
            ));
        }

        issues
    }

    /// Whether `validate` found anything that prevents running.
    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == Severity::Error)
    }
}

/// Direct value if set and non-empty, else the named environment variable.
pub(crate) fn resolve_secret(direct: Option<&str>, env_name: &str) -> Option<String> {
    direct
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var(env_name)
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}
