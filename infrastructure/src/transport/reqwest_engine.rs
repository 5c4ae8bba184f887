//! Production engine: reqwest transfers running on the reactor's task set.
//!
//! reqwest drives its own sockets, so this engine never asks the transport
//! to watch descriptors. Each transfer is a local task that streams body
//! chunks as [`EngineSignal::Data`] and queues its outcome, then pokes the
//! transport through the notify hook.

use super::TransportError;
use super::engine::{ActionTarget, EngineSignal, MultiEngine, TransferOutcome, TransferToken};
use crate::reactor::ReactorHandle;
use puppet_domain::{HttpRequest, Method, TransferError};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::error::Error as _;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Engine limits and identity, from the `[transport]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Whole-transfer limit, including the body.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("puppet-link/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Default)]
struct EngineQueues {
    signals: RefCell<Vec<EngineSignal>>,
    done: RefCell<VecDeque<(TransferToken, TransferOutcome)>>,
    notify: RefCell<Option<Rc<dyn Fn()>>>,
}

impl EngineQueues {
    fn poke(&self) {
        let notify = self.notify.borrow().clone();
        if let Some(notify) = notify {
            notify();
        }
    }
}

pub struct ReqwestEngine {
    client: reqwest::Client,
    reactor: ReactorHandle,
    queues: Rc<EngineQueues>,
    tasks: HashMap<TransferToken, JoinHandle<()>>,
}

impl ReqwestEngine {
    pub fn new(reactor: ReactorHandle, options: &TransportOptions) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .map_err(|e| TransportError::Engine(error_chain(&e)))?;
        debug!(
            "reqwest engine ready (timeout {:?}, connect {:?})",
            options.request_timeout, options.connect_timeout
        );
        Ok(Self {
            client,
            reactor,
            queues: Rc::new(EngineQueues::default()),
            tasks: HashMap::new(),
        })
    }

    fn build(&self, request: HttpRequest) -> Result<reqwest::Request, TransferError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
            .build()
            .map_err(|e| TransferError::InvalidRequest(error_chain(&e)))
    }
}

impl MultiEngine for ReqwestEngine {
    fn attach(&mut self, notify: Rc<dyn Fn()>) {
        *self.queues.notify.borrow_mut() = Some(notify);
    }

    fn add(&mut self, token: TransferToken, request: HttpRequest) -> Result<(), TransferError> {
        let request = self.build(request)?;
        let client = self.client.clone();
        let queues = Rc::clone(&self.queues);
        let task = self.reactor.spawn_local(async move {
            let outcome = fetch(&client, request, token, &queues).await;
            queues.done.borrow_mut().push_back((token, outcome));
            queues.poke();
        });
        self.tasks.insert(token, task);
        Ok(())
    }

    fn action(&mut self, target: ActionTarget) {
        trace!("reqwest engine action: {:?}", target);
        self.tasks.retain(|_, task| !task.is_finished());
    }

    fn take_signals(&mut self) -> Vec<EngineSignal> {
        std::mem::take(&mut *self.queues.signals.borrow_mut())
    }

    fn next_done(&mut self) -> Option<(TransferToken, TransferOutcome)> {
        let (token, outcome) = self.queues.done.borrow_mut().pop_front()?;
        self.tasks.remove(&token);
        Some((token, outcome))
    }

    fn shutdown(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        self.queues.signals.borrow_mut().clear();
        self.queues.done.borrow_mut().clear();
    }
}

impl Drop for ReqwestEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn fetch(
    client: &reqwest::Client,
    request: reqwest::Request,
    token: TransferToken,
    queues: &EngineQueues,
) -> TransferOutcome {
    let mut response = client.execute(request).await.map_err(transfer_error)?;
    let status = response.status().as_u16();
    while let Some(chunk) = response.chunk().await.map_err(transfer_error)? {
        queues
            .signals
            .borrow_mut()
            .push(EngineSignal::Data { token, chunk });
        queues.poke();
    }
    Ok(status)
}

/// The error and its sources, joined; reqwest's own message omits the cause.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn transfer_error(error: reqwest::Error) -> TransferError {
    let message = error_chain(&error);
    if error.is_timeout() {
        TransferError::Timeout
    } else if error.is_connect() && message.contains("dns error") {
        TransferError::Resolve(message)
    } else if error.is_connect() {
        TransferError::Connect(message)
    } else if error.is_builder() {
        TransferError::InvalidRequest(message)
    } else if error.is_body() || error.is_decode() {
        TransferError::Body(message)
    } else {
        TransferError::Other(message)
    }
}
