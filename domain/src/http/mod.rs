//! HTTP call model shared by the transport and the cloud adapters.

pub mod request;
pub mod response;

pub use request::{Headers, HttpRequest, Method};
pub use response::{HttpResponse, ResponseClass, TransferError, classify};
