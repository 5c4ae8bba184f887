//! Speech service settings (speech-to-text, text-to-speech, token issuing).

/// Settings for the speech adapters and their credential broker.
///
/// Endpoint overrides replace the region-derived URLs, which is how
/// sovereign clouds, containers and local mocks are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSettings {
    pub region: String,
    pub subscription_key: String,
    /// Recognition language and SSML `xml:lang`.
    pub language: String,
    pub voice: String,
    /// `X-Microsoft-OutputFormat` for synthesis.
    pub output_format: String,
    /// Content type describing the audio sent for recognition.
    pub audio_content_type: String,
    pub token_endpoint: Option<String>,
    pub recognition_endpoint: Option<String>,
    pub synthesis_endpoint: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            region: "westus".to_string(),
            subscription_key: String::new(),
            language: "en-US".to_string(),
            voice: "en-US-JennyNeural".to_string(),
            output_format: "raw-16khz-16bit-mono-pcm".to_string(),
            audio_content_type: "audio/wav; codecs=audio/pcm; samplerate=16000".to_string(),
            token_endpoint: None,
            recognition_endpoint: None,
            synthesis_endpoint: None,
        }
    }
}

impl SpeechSettings {
    pub fn token_url(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.api.cognitive.microsoft.com/sts/v1.0/issueToken",
                self.region
            )
        })
    }

    pub fn recognition_url(&self) -> String {
        let base = self.recognition_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                self.region
            )
        });
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}language={}&format=simple", base, separator, self.language)
    }

    pub fn synthesis_url(&self) -> String {
        self.synthesis_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                self.region
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_derived_urls() {
        let settings = SpeechSettings {
            region: "eastus".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.token_url(),
            "https://eastus.api.cognitive.microsoft.com/sts/v1.0/issueToken"
        );
        assert_eq!(
            settings.recognition_url(),
            "https://eastus.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language=en-US&format=simple"
        );
        assert_eq!(
            settings.synthesis_url(),
            "https://eastus.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn endpoint_overrides() {
        let settings = SpeechSettings {
            recognition_endpoint: Some("http://localhost:5000/stt?profanity=raw".into()),
            token_endpoint: Some("http://localhost:5000/token".into()),
            ..Default::default()
        };
        assert_eq!(
            settings.recognition_url(),
            "http://localhost:5000/stt?profanity=raw&language=en-US&format=simple"
        );
        assert_eq!(settings.token_url(), "http://localhost:5000/token");
    }
}
