//! Text-to-speech adapter.

use super::shared::{ResultSlot, Shared, authorize, handle_response};
use crate::config::{PipelineSettings, SpeechSettings};
use crate::pipeline::RequestPipeline;
use crate::ports::credential_source::CredentialSource;
use crate::ports::http_client::HttpClient;
use crate::ports::scheduler::Scheduler;
use puppet_domain::{DomainError, PipelineState, build_ssml};
use std::rc::Rc;
use tracing::{debug, info};

const ADAPTER: &str = "text-to-speech";

/// Synthesizes speech audio for short texts.
pub struct TextToSpeech {
    shared: Rc<Shared<SpeechSettings>>,
    pipeline: RequestPipeline,
}

impl TextToSpeech {
    pub fn new(
        http: Rc<dyn HttpClient>,
        scheduler: &dyn Scheduler,
        credentials: Rc<dyn CredentialSource>,
        settings: SpeechSettings,
        pipeline: &PipelineSettings,
    ) -> Self {
        Self {
            pipeline: RequestPipeline::new(
                ADAPTER,
                scheduler,
                Some(Rc::clone(&credentials)),
                pipeline.retry_delay,
            ),
            shared: Rc::new(Shared {
                http,
                credentials,
                settings,
            }),
        }
    }

    /// Queue `text` for synthesis with the configured voice.
    ///
    /// `on_result` receives the audio in the configured output format, or
    /// `None` when the service rejected the request or returned no audio.
    pub fn synthesize<F>(&self, text: &str, on_result: F) -> Result<u64, DomainError>
    where
        F: FnOnce(Option<Vec<u8>>) + 'static,
    {
        if text.trim().is_empty() {
            return Err(DomainError::EmptyInput("text"));
        }
        let settings = &self.shared.settings;
        // SSML is built once so every retry sends identical bytes.
        let ssml: Rc<str> = build_ssml(text, &settings.voice, &settings.language).into();
        info!(chars = text.chars().count(), voice = %settings.voice, "Queueing speech synthesis");

        let slot = ResultSlot::new(on_result);
        let shared = Rc::downgrade(&self.shared);

        Ok(self.pipeline.submit(move |token, resolver| {
            let Some(state) = shared.upgrade() else {
                return;
            };
            let headers = authorize(
                vec![
                    (
                        "Content-Type".to_string(),
                        "application/ssml+xml".to_string(),
                    ),
                    (
                        "X-Microsoft-OutputFormat".to_string(),
                        state.settings.output_format.clone(),
                    ),
                ],
                token.as_ref(),
            );
            debug!(attempt = resolver.attempt(), "Posting SSML for synthesis");

            let weak = Rc::downgrade(&state);
            let slot = slot.clone();
            state.http.post(
                &state.settings.synthesis_url(),
                ssml.as_bytes().to_vec(),
                headers,
                Box::new(move |response| {
                    let Some(state) = weak.upgrade() else {
                        debug!("Text-to-speech dropped before response arrived");
                        return;
                    };
                    handle_response(
                        ADAPTER,
                        response,
                        state.credentials.as_ref(),
                        &slot,
                        resolver,
                        |body| Ok((!body.is_empty()).then(|| body.to_vec())),
                    );
                }),
            );
        }))
    }

    pub fn pending(&self) -> usize {
        self.pipeline.len()
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn attempts(&self) -> u64 {
        self.pipeline.attempts()
    }

    pub fn last_error(&self) -> Option<String> {
        self.pipeline.last_error()
    }
}
