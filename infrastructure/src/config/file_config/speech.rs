//! Speech service configuration from TOML (`[speech]` section)

use super::resolve_secret;
use puppet_application::SpeechSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSpeechConfig {
    /// Service region (default: "westus")
    pub region: String,
    /// Direct subscription key (prefer the env var)
    pub subscription_key: Option<String>,
    /// Environment variable holding the key (default: "SPEECH_KEY")
    pub subscription_key_env: String,
    pub language: String,
    pub voice: String,
    /// Synthesis output format
    pub output_format: String,
    /// Content type of audio sent for recognition
    pub audio_content_type: String,
    pub token_endpoint: Option<String>,
    pub recognition_endpoint: Option<String>,
    pub synthesis_endpoint: Option<String>,
}

impl Default for FileSpeechConfig {
    fn default() -> Self {
        let settings = SpeechSettings::default();
        Self {
            region: settings.region,
            subscription_key: None,
            subscription_key_env: "SPEECH_KEY".to_string(),
            language: settings.language,
            voice: settings.voice,
            output_format: settings.output_format,
            audio_content_type: settings.audio_content_type,
            token_endpoint: None,
            recognition_endpoint: None,
            synthesis_endpoint: None,
        }
    }
}

impl FileSpeechConfig {
    pub fn subscription_key(&self) -> Option<String> {
        resolve_secret(self.subscription_key.as_deref(), &self.subscription_key_env)
    }

    /// Runtime settings; a missing key becomes empty and fails on first use.
    pub fn to_settings(&self) -> SpeechSettings {
        SpeechSettings {
            region: self.region.trim().to_string(),
            subscription_key: self.subscription_key().unwrap_or_default(),
            language: self.language.clone(),
            voice: self.voice.clone(),
            output_format: self.output_format.clone(),
            audio_content_type: self.audio_content_type.clone(),
            token_endpoint: self.token_endpoint.clone(),
            recognition_endpoint: self.recognition_endpoint.clone(),
            synthesis_endpoint: self.synthesis_endpoint.clone(),
        }
    }
}
