//! Chat-completion settings.

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    /// API root, without the `/v1/...` path.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Prepended to every request as a `system` message.
    pub system_prompt: Option<String>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: Some(256),
            temperature: None,
            system_prompt: None,
        }
    }
}

impl CompletionSettings {
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_trims_trailing_slash() {
        let settings = CompletionSettings {
            base_url: "http://localhost:8080/".into(),
            ..Default::default()
        };
        assert_eq!(settings.completions_url(), "http://localhost:8080/v1/chat/completions");
    }
}
