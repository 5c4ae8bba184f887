//! HTTP client port
//!
//! Defines how adapters hand requests to the non-blocking transport.

use puppet_domain::{Headers, HttpResponse};

/// Completion callback for one HTTP call.
pub type HttpCallback = Box<dyn FnOnce(HttpResponse)>;

/// Non-blocking HTTP client.
///
/// Implementations must invoke `on_done` exactly once, on the reactor
/// thread, and never synchronously from within `get`/`post`.
pub trait HttpClient {
    fn get(&self, url: &str, headers: Headers, on_done: HttpCallback);

    fn post(&self, url: &str, body: Vec<u8>, headers: Headers, on_done: HttpCallback);
}
