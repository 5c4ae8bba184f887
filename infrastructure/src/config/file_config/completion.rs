//! Chat-completion configuration from TOML (`[completion]` section)

use super::resolve_secret;
use puppet_application::CompletionSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCompletionConfig {
    /// Base URL (can be pointed at any compatible server)
    pub base_url: String,
    /// Direct API key (prefer the env var)
    pub api_key: Option<String>,
    /// Environment variable holding the key (default: "OPENAI_API_KEY")
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl Default for FileCompletionConfig {
    fn default() -> Self {
        let settings = CompletionSettings::default();
        Self {
            base_url: settings.base_url,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: settings.model,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            system_prompt: None,
        }
    }
}

impl FileCompletionConfig {
    pub fn api_key(&self) -> Option<String> {
        resolve_secret(self.api_key.as_deref(), &self.api_key_env)
    }

    pub fn to_settings(&self) -> CompletionSettings {
        CompletionSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key().unwrap_or_default(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_prompt: self.system_prompt.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_from_named_env_var() {
        let config = FileCompletionConfig {
            api_key_env: "PATH".into(),
            ..Default::default()
        };
        assert_eq!(config.api_key(), std::env::var("PATH").ok());
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let config = FileCompletionConfig {
            api_key: Some("sk".into()),
            system_prompt: Some("   ".into()),
            ..Default::default()
        };
        let settings = config.to_settings();
        assert_eq!(settings.api_key, "sk");
        assert_eq!(settings.system_prompt, None);
        assert_eq!(settings.model, "gpt-4o-mini");
    }
}
