//! Status policy and result delivery shared by the cloud adapters.

use crate::pipeline::Resolver;
use crate::ports::credential_source::CredentialSource;
use crate::ports::http_client::HttpClient;
use puppet_domain::{BearerToken, Disposition, DomainError, Headers, HttpResponse, ResponseClass, classify};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// State an adapter shares with its queued tasks.
///
/// The adapter owns the only strong reference; tasks and HTTP completions
/// hold a `Weak` and give up once the adapter is gone.
pub(crate) struct Shared<S> {
    pub(crate) http: Rc<dyn HttpClient>,
    pub(crate) credentials: Rc<dyn CredentialSource>,
    pub(crate) settings: S,
}

/// Caller callback for one adapter request.
///
/// Shared by every attempt of a task; taken on first delivery so the
/// caller hears back at most once no matter how often the task is retried.
pub(crate) struct ResultSlot<T> {
    callback: Rc<RefCell<Option<Box<dyn FnOnce(Option<T>)>>>>,
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<T> ResultSlot<T> {
    pub(crate) fn new(callback: impl FnOnce(Option<T>) + 'static) -> Self {
        Self {
            callback: Rc::new(RefCell::new(Some(Box::new(callback)))),
        }
    }

    pub(crate) fn deliver(&self, value: Option<T>) {
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

/// Append the `Authorization` header when a token was supplied.
pub(crate) fn authorize(mut headers: Headers, token: Option<&BearerToken>) -> Headers {
    if let Some(token) = token {
        headers.push(("Authorization".to_string(), token.authorization()));
    }
    headers
}

/// Apply the shared status policy to one completed call.
///
/// | class        | caller        | pipeline                  |
/// |--------------|---------------|---------------------------|
/// | success      | decoded value | `Advance`                 |
/// | unauthorized | -             | invalidate token, `Retry` |
/// | other 4xx    | `None`        | `Reject`                  |
/// | transient    | -             | `Retry`                   |
///
/// A success body that fails to decode is a zero-result `Advance` with the
/// decode error recorded. The pipeline is resolved before the caller is
/// notified so the caller observes the queue after its task left it.
pub(crate) fn handle_response<T>(
    adapter: &str,
    response: HttpResponse,
    credentials: &dyn CredentialSource,
    slot: &ResultSlot<T>,
    resolver: Resolver,
    decode: impl FnOnce(&[u8]) -> Result<Option<T>, DomainError>,
) {
    match classify(&response) {
        ResponseClass::Success => match decode(&response.body) {
            Ok(value) => {
                debug!(adapter, found = value.is_some(), "Request succeeded");
                resolver.resolve(Disposition::Advance);
                slot.deliver(value);
            }
            Err(e) => {
                warn!(adapter, "Undecodable response: {}", e);
                resolver.fail(Disposition::Advance, e.to_string());
                slot.deliver(None);
            }
        },
        ResponseClass::Unauthorized => {
            info!(adapter, "Credential rejected, refreshing before retry");
            credentials.invalidate();
            resolver.fail(Disposition::Retry, response.describe());
        }
        ResponseClass::Rejected => {
            let error = response.describe();
            warn!(adapter, "Request rejected: {}", error);
            resolver.fail(Disposition::Reject, error);
            slot.deliver(None);
        }
        ResponseClass::Transient => {
            let error = response.describe();
            warn!(adapter, "Request failed, will retry: {}", error);
            resolver.fail(Disposition::Retry, error);
        }
    }
}
