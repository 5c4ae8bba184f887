//! The request-multiplexing engine as seen by the transport.
//!
//! An engine performs many transfers at once but owns no event loop. It
//! tells the transport which descriptors and which timeout to watch through
//! [`EngineSignal`]s, and is driven back through [`MultiEngine::action`]
//! whenever one of them fires.

use crate::reactor::Readiness;
use bytes::Bytes;
use puppet_domain::{HttpRequest, TransferError};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Identifies one transfer between the transport and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferToken(pub u64);

/// What woke the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    /// A watched descriptor became ready.
    Socket { fd: RawFd, readiness: Readiness },
    /// The engine's timeout elapsed.
    Timeout,
    /// The engine asked to be driven through its notify hook.
    Wake,
}

/// Requests from the engine to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    /// Watch `fd` for `interest`, replacing any earlier interest.
    ///
    /// The engine keeps `fd` open until it signals `Unwatch` for it or is
    /// shut down.
    Watch { fd: RawFd, interest: Readiness },
    Unwatch { fd: RawFd },
    /// Call `action(Timeout)` after the delay; `None` cancels.
    Timeout(Option<Duration>),
    /// Body bytes received for a transfer.
    Data { token: TransferToken, chunk: Bytes },
}

/// Final state of one transfer: the HTTP status, or why none was obtained.
pub type TransferOutcome = Result<u16, TransferError>;

pub trait MultiEngine {
    /// Install the hook an engine calls when it has signals or completions
    /// produced outside `action` (e.g. by its own tasks).
    fn attach(&mut self, notify: Rc<dyn Fn()>);

    /// Begin a transfer. An error means the transfer never started.
    fn add(&mut self, token: TransferToken, request: HttpRequest) -> Result<(), TransferError>;

    /// Make progress after `target` fired.
    fn action(&mut self, target: ActionTarget);

    /// Signals produced since the last call.
    fn take_signals(&mut self) -> Vec<EngineSignal>;

    /// Next finished transfer, if any.
    fn next_done(&mut self) -> Option<(TransferToken, TransferOutcome)>;

    /// Abandon every transfer in progress.
    fn shutdown(&mut self);
}
