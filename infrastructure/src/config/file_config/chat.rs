//! Chat connection configuration from TOML (`[chat]` section)

use super::resolve_secret;
use crate::chat::ChatOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileChatConfig {
    /// `host:port` (default: "irc.chat.twitch.tv:6667")
    pub server: String,
    pub nick: String,
    /// Direct `PASS` value, e.g. `oauth:...` (prefer the env var)
    pub password: Option<String>,
    /// Environment variable holding the password (default: "TWITCH_OAUTH_TOKEN")
    pub password_env: String,
    /// Channel to join, with or without `#`
    pub channel: String,
    pub keepalive_seconds: u64,
    pub reconnect_initial_seconds: u64,
    pub reconnect_max_seconds: u64,
}

impl Default for FileChatConfig {
    fn default() -> Self {
        Self {
            server: "irc.chat.twitch.tv:6667".to_string(),
            nick: String::new(),
            password: None,
            password_env: "TWITCH_OAUTH_TOKEN".to_string(),
            channel: String::new(),
            keepalive_seconds: 60,
            reconnect_initial_seconds: 1,
            reconnect_max_seconds: 60,
        }
    }
}

impl FileChatConfig {
    pub fn password(&self) -> Option<String> {
        resolve_secret(self.password.as_deref(), &self.password_env)
    }

    pub fn to_options(&self) -> ChatOptions {
        ChatOptions {
            server: self.server.trim().to_string(),
            nick: self.nick.trim().to_lowercase(),
            password: self.password(),
            channel: self.channel.clone(),
            keepalive: Duration::from_secs(self.keepalive_seconds),
            reconnect_initial: Duration::from_secs(self.reconnect_initial_seconds),
            reconnect_max: Duration::from_secs(self.reconnect_max_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_options() {
        let config = FileChatConfig {
            nick: " PuppetBot ".into(),
            password: Some("oauth:abc".into()),
            channel: "Streamer".into(),
            reconnect_max_seconds: 30,
            ..Default::default()
        };
        let options = config.to_options();
        assert_eq!(options.nick, "puppetbot");
        assert_eq!(options.password.as_deref(), Some("oauth:abc"));
        assert_eq!(options.channel_name(), "#streamer");
        assert_eq!(options.keepalive, Duration::from_secs(60));
        assert_eq!(options.reconnect_max, Duration::from_secs(30));
    }
}
