//! Subcommand implementations.
//!
//! Every command builds what it needs on one [`Services`]: the reactor, the
//! shared HTTP transport and the settings derived from configuration.

use anyhow::{Context, Result, bail};
use puppet_application::ports::credential_source::CredentialSource;
use puppet_application::ports::http_client::HttpClient;
use puppet_application::{
    ChatCompletion, CredentialBroker, PipelineSettings, SpeechSettings, SpeechToText,
    StaticCredential, TextToSpeech,
};
use puppet_domain::ChatEvent;
use puppet_domain::util::preview;
use puppet_infrastructure::{
    ChatClient, ConfigLoader, FileConfig, Reactor, ReactorHandle, Transport,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest chat reply sent, in bytes.
const MAX_REPLY: usize = 450;

pub struct Services {
    config: FileConfig,
    pipeline: PipelineSettings,
    transport: Rc<Transport>,
    reactor: Reactor,
}

impl Services {
    pub fn new(config: FileConfig) -> Result<Self> {
        let reactor = Reactor::new().context("Failed to start the event loop")?;
        let transport = Transport::with_reqwest(reactor.handle(), &config.transport.to_options())
            .context("Failed to initialize the HTTP transport")?;
        Ok(Self {
            pipeline: config.pipeline.to_settings(),
            config,
            transport: Rc::new(transport),
            reactor,
        })
    }

    fn handle(&self) -> ReactorHandle {
        self.reactor.handle()
    }

    fn http(&self) -> Rc<dyn HttpClient> {
        Rc::clone(&self.transport) as Rc<dyn HttpClient>
    }

    fn speech_broker(&self, settings: &SpeechSettings) -> Rc<dyn CredentialSource> {
        Rc::new(CredentialBroker::new(
            self.http(),
            Rc::new(self.handle()),
            settings.token_url(),
            settings.subscription_key.clone(),
        ))
    }

    fn completion(&self) -> ChatCompletion {
        let settings = self.config.completion.to_settings();
        let credentials = Rc::new(StaticCredential::new(Rc::new(self.handle()), &settings.api_key));
        ChatCompletion::new(self.http(), &self.handle(), credentials, settings, &self.pipeline)
    }

    /// Run the loop until something calls `stop`, or fail after `timeout`.
    fn wait(&self, timeout: Duration, last_error: impl Fn() -> Option<String>) -> Result<()> {
        if self.reactor.run_until_stopped_or(timeout) {
            return Ok(());
        }
        match last_error() {
            Some(error) => bail!("Timed out after {:?}; last error: {}", timeout, error),
            None => bail!("Timed out after {:?}", timeout),
        }
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

/// Slot filled by a one-shot callback, which also stops the loop.
fn one_shot<T: 'static>(handle: ReactorHandle) -> (Rc<RefCell<Option<T>>>, impl FnOnce(T) + 'static) {
    let slot = Rc::new(RefCell::new(None));
    let fill = Rc::clone(&slot);
    let callback = move |value| {
        *fill.borrow_mut() = Some(value);
        handle.stop();
    };
    (slot, callback)
}

pub fn transcribe(services: &Services, file: &Path, timeout: Duration) -> Result<()> {
    let audio = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let settings = services.config.speech.to_settings();
    let credentials = services.speech_broker(&settings);
    let stt = SpeechToText::new(
        services.http(),
        &services.handle(),
        credentials,
        settings,
        &services.pipeline,
    );

    let (outcome, on_result) = one_shot::<Option<String>>(services.handle());
    stt.recognize(audio, on_result)?;
    services.wait(timeout, || stt.last_error())?;

    match outcome.take().flatten() {
        Some(text) => {
            println!("{}", text);
            Ok(())
        }
        None => bail!("Nothing was recognized in {}", file.display()),
    }
}

pub fn speak(services: &Services, text: &str, output: &Path, timeout: Duration) -> Result<()> {
    let settings = services.config.speech.to_settings();
    let credentials = services.speech_broker(&settings);
    let format = settings.output_format.clone();
    let tts = TextToSpeech::new(
        services.http(),
        &services.handle(),
        credentials,
        settings,
        &services.pipeline,
    );

    let (outcome, on_result) = one_shot::<Option<Vec<u8>>>(services.handle());
    tts.synthesize(text, on_result)?;
    services.wait(timeout, || tts.last_error())?;

    let Some(audio) = outcome.take().flatten() else {
        bail!("The service returned no audio");
    };
    fs::write(output, &audio).with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {} bytes of {} to {}", audio.len(), format, output.display());
    println!("{}", output.display());
    Ok(())
}

pub fn complete(services: &Services, prompt: &str, timeout: Duration) -> Result<()> {
    let completion = services.completion();
    let (outcome, on_result) = one_shot::<Option<String>>(services.handle());
    completion.ask(prompt, on_result)?;
    services.wait(timeout, || completion.last_error())?;

    match outcome.take().flatten() {
        Some(answer) => {
            println!("{}", answer);
            Ok(())
        }
        None => bail!("The service returned no answer"),
    }
}

/// Stay in the channel until the process is interrupted.
pub fn chat(services: &Services, respond: bool) -> Result<()> {
    let options = services.config.chat.to_options();
    if options.nick.is_empty() || options.channel.trim().is_empty() {
        bail!("chat.nick and chat.channel must be configured");
    }
    let nick = options.nick.clone();
    let client = ChatClient::new(services.handle(), options);
    let sender = client.sender();
    let completion = respond.then(|| Rc::new(services.completion()));

    client.set_handler(move |event| match event {
        ChatEvent::Welcome => info!("Registered with the chat server"),
        ChatEvent::Joined { channel } => println!("* joined {}", channel),
        ChatEvent::Privmsg(msg) => {
            println!("[{}] {}: {}", msg.channel, msg.display_name, msg.text);
            let Some(completion) = &completion else {
                return;
            };
            if !msg.mentions(&nick) {
                return;
            }
            let sender = sender.clone();
            let speaker = msg.display_name.clone();
            let prompt = format!("{} says: {}", msg.display_name, msg.text);
            let queued = completion.ask(&prompt, move |answer| {
                let Some(answer) = answer else {
                    debug!("No answer for {}", speaker);
                    return;
                };
                let reply = format_reply(&speaker, &answer);
                if let Err(e) = sender.send_privmsg(&reply) {
                    warn!("Reply to {} not sent: {}", speaker, e);
                }
            });
            if let Err(e) = queued {
                warn!("Could not queue completion: {}", e);
            }
        }
        ChatEvent::Disconnected { reason } => println!("* disconnected: {}", reason),
        ChatEvent::Other(message) => debug!("Unhandled {}", message.command),
    });

    client.connect();
    services.reactor.run_forever();
    Ok(())
}

pub fn show_config(config: &FileConfig, explicit: Option<&Path>) -> Result<()> {
    println!("Configuration sources (in priority order):");
    for source in ConfigLoader::sources(explicit) {
        let mark = if source.found { "FOUND" } else { "     " };
        println!("  [{}] {:<8} {}", mark, format!("{}:", source.label), source.location);
    }

    let issues = config.validate();
    if !issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &issues {
            println!("  {}", issue);
        }
    }

    println!();
    println!("Effective configuration:");
    let rendered = toml::to_string_pretty(&masked(config)).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

fn masked(config: &FileConfig) -> FileConfig {
    let hide = |value: &mut Option<String>| {
        if value.is_some() {
            *value = Some("***".to_string());
        }
    };
    let mut config = config.clone();
    hide(&mut config.speech.subscription_key);
    hide(&mut config.completion.api_key);
    hide(&mut config.chat.password);
    config
}

/// `@speaker answer`, flattened to one line and clipped to [`MAX_REPLY`].
fn format_reply(speaker: &str, answer: &str) -> String {
    let prefix = format!("@{} ", speaker);
    let budget = MAX_REPLY.saturating_sub(prefix.len());
    let answer = answer.trim();
    let mut body = preview(answer, budget);
    if body.len() > budget {
        // Leave room for the ellipsis `preview` appends.
        body = preview(answer, budget.saturating_sub('…'.len_utf8()));
    }
    format!("{}{}", prefix, body)
}
