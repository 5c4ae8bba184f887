//! Credential sources for cloud adapters.
//!
//! - [`CredentialBroker`]: token issued by an endpoint, cached and coalesced
//! - [`StaticCredential`]: fixed API key used directly as a bearer token

mod broker;

pub use broker::{CredentialBroker, SUBSCRIPTION_KEY_HEADER};

use crate::ports::credential_source::{CredentialCallback, CredentialError, CredentialSource};
use crate::ports::scheduler::Scheduler;
use puppet_domain::BearerToken;
use std::rc::Rc;

/// A fixed API key handed out as a bearer token.
pub struct StaticCredential {
    token: Option<BearerToken>,
    scheduler: Rc<dyn Scheduler>,
}

impl StaticCredential {
    pub fn new(scheduler: Rc<dyn Scheduler>, api_key: &str) -> Self {
        Self {
            token: BearerToken::new(api_key),
            scheduler,
        }
    }
}

impl CredentialSource for StaticCredential {
    fn get(&self, callback: CredentialCallback) {
        let result = self.token.clone().ok_or(CredentialError::MissingKey);
        self.scheduler.defer(Box::new(move || callback(result)));
    }

    // A static key cannot be refreshed; the next attempt reuses it.
    fn invalidate(&self) {}
}
