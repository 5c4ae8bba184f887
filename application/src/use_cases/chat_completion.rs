//! Chat-completion adapter (OpenAI-compatible endpoint).

use super::shared::{ResultSlot, Shared, authorize, handle_response};
use crate::config::{CompletionSettings, PipelineSettings};
use crate::pipeline::RequestPipeline;
use crate::ports::credential_source::CredentialSource;
use crate::ports::http_client::HttpClient;
use crate::ports::scheduler::Scheduler;
use puppet_domain::{ChatMessage, CompletionRequest, CompletionResponse, DomainError, PipelineState};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

const ADAPTER: &str = "chat-completion";

/// Sends conversations to a chat-completion endpoint, one at a time.
///
/// Exactly one disposition is reported per attempt, so a failed call is
/// retried once per failure and never dispatched twice.
pub struct ChatCompletion {
    shared: Rc<Shared<CompletionSettings>>,
    pipeline: RequestPipeline,
    system_prompt: RefCell<Option<String>>,
}

impl ChatCompletion {
    pub fn new(
        http: Rc<dyn HttpClient>,
        scheduler: &dyn Scheduler,
        credentials: Rc<dyn CredentialSource>,
        settings: CompletionSettings,
        pipeline: &PipelineSettings,
    ) -> Self {
        let system_prompt = RefCell::new(settings.system_prompt.clone());
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
            system_prompt,
        }
    }

    /// Replace the system prompt used for requests submitted from now on.
    pub fn set_system_prompt(&self, prompt: Option<String>) {
        *self.system_prompt.borrow_mut() = prompt.filter(|p| !p.trim().is_empty());
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.system_prompt.borrow().clone()
    }

    /// Queue a conversation.
    ///
    /// The system prompt, when set, is prepended. `on_result` receives the
    /// first choice's content, or `None` for an empty answer or a rejected
    /// request.
    pub fn complete<F>(&self, messages: Vec<ChatMessage>, on_result: F) -> Result<u64, DomainError>
    where
        F: FnOnce(Option<String>) + 'static,
    {
        if messages.is_empty() {
            return Err(DomainError::EmptyInput("messages"));
        }
        let settings = &self.shared.settings;
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = self.system_prompt.borrow().as_ref() {
            conversation.push(ChatMessage::system(prompt.clone()));
        }
        conversation.extend(messages);

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages: conversation,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        };
        let body: Rc<[u8]> = serde_json::to_vec(&request)?.into();
        info!(model = %request.model, messages = request.messages.len(), "Queueing chat completion");

        let slot = ResultSlot::new(on_result);
        let shared = Rc::downgrade(&self.shared);

        Ok(self.pipeline.submit(move |token, resolver| {
            let Some(state) = shared.upgrade() else {
                return;
            };
            let headers = authorize(
                vec![("Content-Type".to_string(), "application/json".to_string())],
                token.as_ref(),
            );
            debug!(attempt = resolver.attempt(), "Posting chat completion");

            let weak = Rc::downgrade(&state);
            let slot = slot.clone();
            state.http.post(
                &state.settings.completions_url(),
                body.to_vec(),
                headers,
                Box::new(move |response| {
                    let Some(state) = weak.upgrade() else {
                        debug!("Chat completion dropped before response arrived");
                        return;
                    };
                    handle_response(
                        ADAPTER,
                        response,
                        state.credentials.as_ref(),
                        &slot,
                        resolver,
                        |body| {
                            let parsed = CompletionResponse::parse(body)?;
                            Ok(parsed.first_text().map(str::to_string))
                        },
                    );
                }),
            );
        }))
    }

    /// Single-turn convenience over [`complete`](Self::complete).
    pub fn ask<F>(&self, prompt: &str, on_result: F) -> Result<u64, DomainError>
    where
        F: FnOnce(Option<String>) + 'static,
    {
        if prompt.trim().is_empty() {
            return Err(DomainError::EmptyInput("prompt"));
        }
        self.complete(vec![ChatMessage::user(prompt)], on_result)
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
