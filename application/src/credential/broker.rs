//! Bearer-token cache with single-fetch coalescing.

use crate::ports::credential_source::{CredentialCallback, CredentialError, CredentialSource};
use crate::ports::http_client::HttpClient;
use crate::ports::scheduler::Scheduler;
use puppet_domain::{BearerToken, HttpResponse};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

/// Header carrying the subscription key on token requests.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

struct BrokerState {
    key: String,
    token: Option<BearerToken>,
    waiters: Vec<CredentialCallback>,
    fetching: bool,
    /// Bumped whenever the key changes; a fetch started under an older
    /// generation never populates the cache.
    generation: u64,
    fetches: u64,
    clears: u64,
}

struct BrokerInner {
    http: Rc<dyn HttpClient>,
    scheduler: Rc<dyn Scheduler>,
    endpoint: String,
    state: RefCell<BrokerState>,
}

/// Obtains and caches one bearer token, coalescing concurrent requesters.
///
/// At most one token fetch is in flight. Every waiter queued while it runs
/// receives the same result, and the waiter list is drained before another
/// fetch can start.
pub struct CredentialBroker {
    inner: Rc<BrokerInner>,
}

impl CredentialBroker {
    pub fn new(
        http: Rc<dyn HttpClient>,
        scheduler: Rc<dyn Scheduler>,
        endpoint: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            inner: Rc::new(BrokerInner {
                http,
                scheduler,
                endpoint: endpoint.into(),
                state: RefCell::new(BrokerState {
                    key: key.into(),
                    token: None,
                    waiters: Vec::new(),
                    fetching: false,
                    generation: 0,
                    fetches: 0,
                    clears: 0,
                }),
            }),
        }
    }

    /// Deliver the cached token, or join / start a fetch.
    pub fn get(&self, callback: CredentialCallback) {
        let mut state = self.inner.state.borrow_mut();

        if let Some(token) = state.token.clone() {
            drop(state);
            let weak = Rc::downgrade(&self.inner);
            self.inner.scheduler.defer(Box::new(move || {
                if weak.upgrade().is_some() {
                    callback(Ok(token));
                }
            }));
            return;
        }

        if state.key.is_empty() {
            drop(state);
            let weak = Rc::downgrade(&self.inner);
            self.inner.scheduler.defer(Box::new(move || {
                if weak.upgrade().is_some() {
                    callback(Err(CredentialError::MissingKey));
                }
            }));
            return;
        }

        state.waiters.push(callback);
        if state.fetching {
            debug!(waiters = state.waiters.len(), "Joining outstanding token fetch");
            return;
        }

        state.fetching = true;
        state.fetches += 1;
        let generation = state.generation;
        let headers = vec![
            (SUBSCRIPTION_KEY_HEADER.to_string(), state.key.clone()),
            ("Content-Length".to_string(), "0".to_string()),
        ];
        drop(state);

        debug!(endpoint = %self.inner.endpoint, "Requesting bearer token");
        let weak = Rc::downgrade(&self.inner);
        self.inner.http.post(
            &self.inner.endpoint,
            Vec::new(),
            headers,
            Box::new(move |response| BrokerInner::on_fetched(weak, generation, response)),
        );
    }

    /// Drop the cached token (after an authentication failure).
    pub fn clear(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.token.take().is_some() {
            info!("Bearer token cleared");
        }
        state.clears += 1;
    }

    /// Replace the subscription key; a changed key forces a re-issue.
    pub fn update_key(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.inner.state.borrow_mut();
        if state.key != key {
            state.key = key;
            state.token = None;
            state.generation += 1;
            info!("Subscription key updated, cached token dropped");
        }
    }

    pub fn has_token(&self) -> bool {
        self.inner.state.borrow().token.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.state.borrow().fetching
    }

    /// Token requests issued so far.
    pub fn fetch_count(&self) -> u64 {
        self.inner.state.borrow().fetches
    }

    /// Times [`clear`](Self::clear) was called.
    pub fn clear_count(&self) -> u64 {
        self.inner.state.borrow().clears
    }
}

impl BrokerInner {
    fn on_fetched(weak: Weak<BrokerInner>, generation: u64, response: HttpResponse) {
        let Some(inner) = weak.upgrade() else {
            debug!("Broker dropped before token response arrived");
            return;
        };

        let (waiters, result) = {
            let mut state = inner.state.borrow_mut();
            state.fetching = false;
            let result = if response.is_ok() {
                match BearerToken::new(response.body_text()) {
                    Some(token) => {
                        if state.generation == generation {
                            state.token = Some(token.clone());
                        } else {
                            debug!("Key changed during fetch, token not cached");
                        }
                        Ok(token)
                    }
                    None => Err(CredentialError::EmptyToken),
                }
            } else {
                Err(CredentialError::Fetch(response.describe()))
            };
            (std::mem::take(&mut state.waiters), result)
        };

        match &result {
            Ok(_) => info!(waiters = waiters.len(), "Bearer token issued"),
            Err(e) => warn!(waiters = waiters.len(), "Bearer token request failed: {}", e),
        }
        for waiter in waiters {
            waiter(result.clone());
        }
    }
}

impl CredentialSource for CredentialBroker {
    fn get(&self, callback: CredentialCallback) {
        CredentialBroker::get(self, callback);
    }

    fn invalidate(&self) {
        self.clear();
    }
}
