//! Transport and pipeline configuration from TOML (`[transport]`, `[pipeline]`)

use crate::transport::TransportOptions;
use puppet_application::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTransportConfig {
    /// Whole-transfer timeout (default: 30)
    pub request_timeout_seconds: u64,
    /// Connect timeout (default: 10)
    pub connect_timeout_seconds: u64,
    /// Overrides the built-in `User-Agent`
    pub user_agent: Option<String>,
}

impl Default for FileTransportConfig {
    fn default() -> Self {
        let options = TransportOptions::default();
        Self {
            request_timeout_seconds: options.request_timeout.as_secs(),
            connect_timeout_seconds: options.connect_timeout.as_secs(),
            user_agent: None,
        }
    }
}

impl FileTransportConfig {
    pub fn to_options(&self) -> TransportOptions {
        let mut options = TransportOptions {
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            ..Default::default()
        };
        if let Some(agent) = self.user_agent.as_ref().filter(|a| !a.is_empty()) {
            options.user_agent = agent.clone();
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePipelineConfig {
    /// Delay before retrying a transient failure (default: 10000)
    pub retry_delay_ms: u64,
}

impl Default for FilePipelineConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: PipelineSettings::default().retry_delay.as_millis() as u64,
        }
    }
}

impl FilePipelineConfig {
    pub fn to_settings(&self) -> PipelineSettings {
        PipelineSettings::default().with_retry_delay(Duration::from_millis(self.retry_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_defaults_round_trip() {
        assert_eq!(FileTransportConfig::default().to_options(), TransportOptions::default());
    }

    #[test]
    fn test_user_agent_override() {
        let config = FileTransportConfig {
            user_agent: Some("bot/1".into()),
            connect_timeout_seconds: 3,
            ..Default::default()
        };
        let options = config.to_options();
        assert_eq!(options.user_agent, "bot/1");
        assert_eq!(options.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_pipeline_delay() {
        let config = FilePipelineConfig { retry_delay_ms: 250 };
        assert_eq!(config.to_settings().retry_delay, Duration::from_millis(250));
    }
}
