//! Speech-to-text adapter.

use super::shared::{ResultSlot, Shared, authorize, handle_response};
use crate::config::{PipelineSettings, SpeechSettings};
use crate::pipeline::RequestPipeline;
use crate::ports::credential_source::CredentialSource;
use crate::ports::http_client::HttpClient;
use crate::ports::scheduler::Scheduler;
use puppet_domain::{DomainError, PipelineState, RecognitionResult};
use std::rc::Rc;
use tracing::{debug, info};

const ADAPTER: &str = "speech-to-text";

/// Recognizes short utterances through the cloud speech service.
///
/// Requests are serialized through one [`RequestPipeline`]; each attempt
/// obtains a bearer token first. Dropping the adapter abandons every
/// queued request without invoking its callback.
pub struct SpeechToText {
    shared: Rc<Shared<SpeechSettings>>,
    pipeline: RequestPipeline,
}

impl SpeechToText {
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

    /// Queue `audio` (16 kHz mono PCM WAV) for recognition.
    ///
    /// `on_result` receives the recognized text, or `None` when nothing was
    /// recognized or the service rejected the request. Transient failures
    /// are retried and do not reach the caller.
    pub fn recognize<F>(&self, audio: Vec<u8>, on_result: F) -> Result<u64, DomainError>
    where
        F: FnOnce(Option<String>) + 'static,
    {
        if audio.is_empty() {
            return Err(DomainError::EmptyInput("audio"));
        }
        info!(bytes = audio.len(), "Queueing speech recognition");

        let audio: Rc<[u8]> = audio.into();
        let slot = ResultSlot::new(on_result);
        let shared = Rc::downgrade(&self.shared);

        Ok(self.pipeline.submit(move |token, resolver| {
            let Some(state) = shared.upgrade() else {
                return;
            };
            let headers = authorize(
                vec![(
                    "Content-Type".to_string(),
                    state.settings.audio_content_type.clone(),
                )],
                token.as_ref(),
            );
            debug!(attempt = resolver.attempt(), "Posting audio for recognition");

            let weak = Rc::downgrade(&state);
            let slot = slot.clone();
            state.http.post(
                &state.settings.recognition_url(),
                audio.to_vec(),
                headers,
                Box::new(move |response| {
                    let Some(state) = weak.upgrade() else {
                        debug!("Speech-to-text dropped before response arrived");
                        return;
                    };
                    handle_response(
                        ADAPTER,
                        response,
                        state.credentials.as_ref(),
                        &slot,
                        resolver,
                        |body| {
                            let result = RecognitionResult::parse(body)?;
                            Ok(result.text().map(str::to_string))
                        },
                    );
                }),
            );
        }))
    }

    /// Requests not yet finished, including the one in flight.
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

    pub fn settings(&self) -> &SpeechSettings {
        &self.shared.settings
    }
}
