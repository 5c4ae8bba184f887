//! Non-blocking HTTP transport shared by every cloud adapter.
//!
//! The [`Transport`] bridges a [`MultiEngine`] to the reactor:
//!
//! ```text
//! get/post ──► pending table ──► engine.add ──► signals
//!                                                 │
//!   ┌─────────── Watch / Unwatch ──► Poll per fd ◄┤
//!   │            Timeout(d)      ──► one Timer   ◄┤
//!   │            Data            ──► body buffer ◄┘
//!   ▼
//! readiness / timer / notify ──► engine.action ──► drain completions ──► on_done
//! ```
//!
//! Completion callbacks are deferred onto the reactor, so `on_done` never
//! runs inside the submitting call. The transport never retries; that is
//! the request pipeline's job.
//!
//! [`ReqwestEngine`] drives its own sockets and only ever emits `Data`
//! signals, waking the transport through the notify hook. The `Watch`,
//! `Unwatch` and `Timeout` paths serve descriptor-based engines; in this
//! crate they are exercised by the scripted engine in the tests below.

mod engine;
mod reqwest_engine;

pub use engine::{ActionTarget, EngineSignal, MultiEngine, TransferOutcome, TransferToken};
pub use reqwest_engine::{ReqwestEngine, TransportOptions};

use crate::reactor::{Poll, ReactorHandle, Readiness, Timer};
use puppet_application::ports::http_client::{HttpCallback, HttpClient};
use puppet_domain::{Headers, HttpRequest, HttpResponse, TransferError};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to initialize HTTP engine: {0}")]
    Engine(String),
}

/// An in-flight transfer: the body received so far and its callback.
struct PendingTransfer {
    body: Vec<u8>,
    on_done: HttpCallback,
}

/// A watched engine descriptor.
struct Registration {
    interest: Readiness,
    poll: Poll,
}

struct TransportState {
    open: bool,
    next_token: u64,
    pending: HashMap<TransferToken, PendingTransfer>,
    registrations: HashMap<RawFd, Registration>,
    timeout: Timer,
}

struct TransportInner {
    reactor: ReactorHandle,
    engine: RefCell<Box<dyn MultiEngine>>,
    state: RefCell<TransportState>,
    wake_queued: Cell<bool>,
}

/// HTTP client multiplexing every transfer on the reactor thread.
///
/// Created once with [`initialize`](Self::initialize) and torn down with
/// [`shutdown`](Self::shutdown) (or by dropping it).
pub struct Transport {
    inner: Rc<TransportInner>,
}

impl Transport {
    pub fn initialize(
        reactor: ReactorHandle,
        mut engine: Box<dyn MultiEngine>,
    ) -> Result<Self, TransportError> {
        let timeout = reactor.create_timer();
        let inner = Rc::new_cyclic(|weak: &Weak<TransportInner>| {
            engine.attach(notify_hook(weak.clone(), reactor.clone()));
            TransportInner {
                reactor,
                engine: RefCell::new(engine),
                state: RefCell::new(TransportState {
                    open: true,
                    next_token: 0,
                    pending: HashMap::new(),
                    registrations: HashMap::new(),
                    timeout,
                }),
                wake_queued: Cell::new(false),
            }
        });
        info!("HTTP transport initialized");
        Ok(Self { inner })
    }

    /// Transport backed by [`ReqwestEngine`].
    pub fn with_reqwest(
        reactor: ReactorHandle,
        options: &TransportOptions,
    ) -> Result<Self, TransportError> {
        let engine = ReqwestEngine::new(reactor.clone(), options)?;
        Self::initialize(reactor, Box::new(engine))
    }

    /// Start a transfer. `on_done` runs exactly once, on a later loop turn.
    pub fn request(&self, request: HttpRequest, on_done: HttpCallback) {
        let token = {
            let mut state = self.inner.state.borrow_mut();
            if !state.open {
                drop(state);
                warn!("Request to {} after transport shutdown", request.url);
                self.inner
                    .reactor
                    .defer(move || on_done(HttpResponse::failed(TransferError::Shutdown)));
                return;
            }
            state.next_token += 1;
            let token = TransferToken(state.next_token);
            state.pending.insert(
                token,
                PendingTransfer {
                    body: Vec::new(),
                    on_done,
                },
            );
            token
        };

        debug!(
            "{} {} ({} body bytes, transfer {})",
            request.method,
            request.url,
            request.body_len(),
            token.0
        );
        let added = self.inner.engine.borrow_mut().add(token, request);
        if let Err(e) = added {
            warn!("Transfer {} could not start: {}", token.0, e);
            let transfer = self.inner.state.borrow_mut().pending.remove(&token);
            if let Some(transfer) = transfer {
                let on_done = transfer.on_done;
                self.inner
                    .reactor
                    .defer(move || on_done(HttpResponse::failed(e)));
            }
        }
        self.inner.apply_signals();
    }

    /// Fail every pending transfer and release all registrations.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.borrow().open
    }

    /// Transfers started and not yet completed.
    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Registrations held for `fd`: always 0 or 1.
    pub fn registration_count(&self, fd: RawFd) -> usize {
        usize::from(self.inner.state.borrow().registrations.contains_key(&fd))
    }

    /// Interest currently watched on `fd`.
    pub fn watched_interest(&self, fd: RawFd) -> Option<Readiness> {
        self.inner
            .state
            .borrow()
            .registrations
            .get(&fd)
            .map(|r| r.interest)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.is_open() {
            self.inner.shutdown();
        }
    }
}

impl HttpClient for Transport {
    fn get(&self, url: &str, headers: Headers, on_done: HttpCallback) {
        self.request(HttpRequest::get(url).with_headers(headers), on_done);
    }

    fn post(&self, url: &str, body: Vec<u8>, headers: Headers, on_done: HttpCallback) {
        self.request(HttpRequest::post(url, body).with_headers(headers), on_done);
    }
}

/// Engine notify hook: schedules one `Wake` action per loop turn.
fn notify_hook(weak: Weak<TransportInner>, reactor: ReactorHandle) -> Rc<dyn Fn()> {
    Rc::new(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.wake_queued.replace(true) {
            return;
        }
        let weak = weak.clone();
        reactor.defer(move || {
            if let Some(inner) = weak.upgrade() {
                inner.wake_queued.set(false);
                inner.on_event(ActionTarget::Wake);
            }
        });
    })
}

impl TransportInner {
    fn on_event(self: &Rc<Self>, target: ActionTarget) {
        if !self.state.borrow().open {
            return;
        }
        trace!("Transport woke: {:?}", target);
        self.engine.borrow_mut().action(target);
        self.apply_signals();
        self.drain_completions();
    }

    fn apply_signals(self: &Rc<Self>) {
        let signals = self.engine.borrow_mut().take_signals();
        if signals.is_empty() {
            return;
        }
        let mut state = self.state.borrow_mut();
        for signal in signals {
            match signal {
                EngineSignal::Watch { fd, interest } => self.watch(&mut state, fd, interest),
                EngineSignal::Unwatch { fd } => {
                    if state.registrations.remove(&fd).is_some() {
                        trace!("Unwatched fd {}", fd);
                    }
                }
                EngineSignal::Timeout(Some(delay)) => {
                    let weak = Rc::downgrade(self);
                    state.timeout.start(
                        delay,
                        Duration::ZERO,
                        Box::new(move || {
                            if let Some(inner) = weak.upgrade() {
                                inner.on_event(ActionTarget::Timeout);
                            }
                        }),
                    );
                }
                EngineSignal::Timeout(None) => state.timeout.stop(),
                EngineSignal::Data { token, chunk } => match state.pending.get_mut(&token) {
                    Some(transfer) => transfer.body.extend_from_slice(&chunk),
                    None => trace!("Dropping {} bytes for finished transfer {}", chunk.len(), token.0),
                },
            }
        }
    }

    /// Create, re-arm or remove the registration for `fd`.
    fn watch(self: &Rc<Self>, state: &mut TransportState, fd: RawFd, interest: Readiness) {
        if interest.is_empty() {
            state.registrations.remove(&fd);
            return;
        }
        if let Some(existing) = state.registrations.get(&fd)
            && existing.interest == interest
        {
            return;
        }

        let weak = Rc::downgrade(self);
        let on_ready = move |readiness| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(ActionTarget::Socket { fd, readiness });
            }
        };

        // An existing registration is re-armed in place.
        if let Some(existing) = state.registrations.get_mut(&fd) {
            existing.poll.start(interest, on_ready);
            existing.interest = interest;
            trace!("Re-armed fd {} for {:?}", fd, interest);
            return;
        }

        // SAFETY: engines keep a watched descriptor open until they signal
        // `Unwatch` for it or are shut down, and both drop the registration.
        match unsafe { self.reactor.create_poll(fd) } {
            Ok(mut poll) => {
                poll.start(interest, on_ready);
                state
                    .registrations
                    .insert(fd, Registration { interest, poll });
                trace!("Watching fd {} for {:?}", fd, interest);
            }
            Err(e) => warn!("Cannot watch fd {}: {}", fd, e),
        }
    }

    fn drain_completions(&self) {
        loop {
            let next = self.engine.borrow_mut().next_done();
            let Some((token, outcome)) = next else {
                break;
            };
            let transfer = self.state.borrow_mut().pending.remove(&token);
            let Some(transfer) = transfer else {
                trace!("Completion for unknown transfer {}", token.0);
                continue;
            };
            let response = match outcome {
                Ok(status) => {
                    debug!(
                        "Transfer {} finished: HTTP {} ({} bytes)",
                        token.0,
                        status,
                        transfer.body.len()
                    );
                    HttpResponse::completed(status, transfer.body)
                }
                Err(e) => {
                    debug!("Transfer {} failed: {}", token.0, e);
                    HttpResponse::failed(e)
                }
            };
            let on_done = transfer.on_done;
            self.reactor.defer(move || on_done(response));
        }
    }

    fn shutdown(&self) {
        let pending: Vec<PendingTransfer> = {
            let mut state = self.state.borrow_mut();
            if !state.open {
                return;
            }
            state.open = false;
            state.registrations.clear();
            state.timeout.stop();
            state.pending.drain().map(|(_, transfer)| transfer).collect()
        };
        self.engine.borrow_mut().shutdown();
        info!("HTTP transport shut down ({} transfers abandoned)", pending.len());
        for transfer in pending {
            let on_done = transfer.on_done;
            self.reactor
                .defer(move || on_done(HttpResponse::failed(TransferError::Shutdown)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io::{ErrorKind, Read, Write};
    use std::net::Shutdown;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    /// Engine whose "connections" are socket pairs the test writes into.
    #[derive(Default)]
    struct FakeState {
        streams: HashMap<TransferToken, (UnixStream, UnixStream)>,
        /// Finished streams stay open so descriptor numbers are not reused.
        retired: Vec<(UnixStream, UnixStream)>,
        signals: Vec<EngineSignal>,
        done: VecDeque<(TransferToken, TransferOutcome)>,
        actions: Vec<ActionTarget>,
        notify: Option<Rc<dyn Fn()>>,
        reject_adds: bool,
    }

    #[derive(Clone, Default)]
    struct FakeEngine(Rc<RefCell<FakeState>>);

    impl FakeEngine {
        fn fd(&self, token: u64) -> RawFd {
            self.0.borrow().streams[&TransferToken(token)].0.as_raw_fd()
        }

        fn peer(&self, token: u64) -> UnixStream {
            self.0.borrow().streams[&TransferToken(token)]
                .1
                .try_clone()
                .unwrap()
        }

        fn signal(&self, signal: EngineSignal) {
            self.0.borrow_mut().signals.push(signal);
            self.poke();
        }

        fn complete_externally(&self, token: u64, outcome: TransferOutcome) {
            self.0.borrow_mut().finish(TransferToken(token), outcome);
            self.poke();
        }

        fn poke(&self) {
            let notify = self.0.borrow().notify.clone();
            if let Some(notify) = notify {
                notify();
            }
        }

        fn wakes(&self) -> usize {
            self.0
                .borrow()
                .actions
                .iter()
                .filter(|a| **a == ActionTarget::Wake)
                .count()
        }
    }

    impl FakeState {
        fn finish(&mut self, token: TransferToken, outcome: TransferOutcome) {
            if let Some(pair) = self.streams.remove(&token) {
                self.signals.push(EngineSignal::Unwatch {
                    fd: pair.0.as_raw_fd(),
                });
                self.retired.push(pair);
            }
            self.done.push_back((token, outcome));
            if self.streams.is_empty() {
                self.signals.push(EngineSignal::Timeout(None));
            }
        }

        fn read_ready(&mut self, fd: RawFd) {
            let Some(token) = self
                .streams
                .iter()
                .find(|(_, (ours, _))| ours.as_raw_fd() == fd)
                .map(|(token, _)| *token)
            else {
                return;
            };
            let mut buf = [0u8; 64];
            loop {
                let read = self.streams.get_mut(&token).map(|(ours, _)| ours.read(&mut buf));
                match read {
                    Some(Ok(0)) => return self.finish(token, Ok(200)),
                    Some(Ok(n)) => self.signals.push(EngineSignal::Data {
                        token,
                        chunk: Bytes::copy_from_slice(&buf[..n]),
                    }),
                    Some(Err(e)) if e.kind() == ErrorKind::WouldBlock => return,
                    Some(Err(e)) => return self.finish(token, Err(TransferError::Other(e.to_string()))),
                    None => return,
                }
            }
        }
    }

    impl MultiEngine for FakeEngine {
        fn attach(&mut self, notify: Rc<dyn Fn()>) {
            self.0.borrow_mut().notify = Some(notify);
        }

        fn add(&mut self, token: TransferToken, request: HttpRequest) -> Result<(), TransferError> {
            let mut state = self.0.borrow_mut();
            if state.reject_adds {
                return Err(TransferError::InvalidRequest(request.url));
            }
            let (ours, peer) = UnixStream::pair().map_err(|e| TransferError::Other(e.to_string()))?;
            ours.set_nonblocking(true)
                .map_err(|e| TransferError::Other(e.to_string()))?;
            state.signals.push(EngineSignal::Watch {
                fd: ours.as_raw_fd(),
                interest: Readiness::READABLE,
            });
            state
                .signals
                .push(EngineSignal::Timeout(Some(Duration::from_secs(30))));
            state.streams.insert(token, (ours, peer));
            Ok(())
        }

        fn action(&mut self, target: ActionTarget) {
            let mut state = self.0.borrow_mut();
            state.actions.push(target);
            match target {
                ActionTarget::Socket { fd, readiness } if readiness.readable => state.read_ready(fd),
                ActionTarget::Timeout => {
                    let tokens: Vec<_> = state.streams.keys().copied().collect();
                    for token in tokens {
                        state.finish(token, Err(TransferError::Timeout));
                    }
                }
                _ => {}
            }
        }

        fn take_signals(&mut self) -> Vec<EngineSignal> {
            std::mem::take(&mut self.0.borrow_mut().signals)
        }

        fn next_done(&mut self) -> Option<(TransferToken, TransferOutcome)> {
            self.0.borrow_mut().done.pop_front()
        }

        fn shutdown(&mut self) {
            let mut state = self.0.borrow_mut();
            let streams: Vec<_> = state.streams.drain().map(|(_, pair)| pair).collect();
            state.retired.extend(streams);
        }
    }

    type Slot = Rc<RefCell<Option<HttpResponse>>>;

    fn capture() -> (Slot, HttpCallback) {
        let slot: Slot = Rc::default();
        let s = Rc::clone(&slot);
        (slot, Box::new(move |response| *s.borrow_mut() = Some(response)))
    }

    fn run_until(reactor: &Reactor, done: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if done() {
                return;
            }
            reactor.run_once();
        }
        panic!("condition not reached");
    }

    #[test]
    fn streams_body_and_releases_registration() {
        let reactor = Reactor::new().unwrap();
        let engine = FakeEngine::default();
        let transport = Transport::initialize(reactor.handle(), Box::new(engine.clone())).unwrap();

        let (slot, on_done) = capture();
        transport.get("http://fake/voice", vec![], on_done);
        let fd = engine.fd(1);
        assert_eq!(transport.registration_count(fd), 1);
        assert_eq!(transport.pending_count(), 1);

        // Interest changes re-arm the same registration.
        engine.signal(EngineSignal::Watch {
            fd,
            interest: Readiness::BOTH,
        });
        run_until(&reactor, || transport.watched_interest(fd) == Some(Readiness::BOTH));
        assert_eq!(transport.registration_count(fd), 1);
        engine.signal(EngineSignal::Watch {
            fd,
            interest: Readiness::READABLE,
        });
        run_until(&reactor, || transport.watched_interest(fd) == Some(Readiness::READABLE));
        assert_eq!(transport.registration_count(fd), 1);

        let mut peer = engine.peer(1);
        peer.write_all(b"hello ").unwrap();
        peer.write_all(b"world").unwrap();
        peer.shutdown(Shutdown::Write).unwrap();
        drop(peer);

        run_until(&reactor, || slot.borrow().is_some());
        let response = slot.borrow_mut().take().unwrap();
        assert!(response.is_ok());
        assert_eq!(response.body, b"hello world");
        assert_eq!(transport.registration_count(fd), 0);
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn engine_timeout_fails_the_transfer() {
        let reactor = Reactor::paused();
        let engine = FakeEngine::default();
        let transport = Transport::initialize(reactor.handle(), Box::new(engine.clone())).unwrap();

        let (slot, on_done) = capture();
        transport.post("http://fake/slow", b"{}".to_vec(), vec![], on_done);
        let fd = engine.fd(1);
        run_until(&reactor, || slot.borrow().is_some());

        let response = slot.borrow_mut().take().unwrap();
        assert_eq!(response.outcome, Err(TransferError::Timeout));
        assert_eq!(response.status, 0);
        assert!(response.body.is_empty());
        assert_eq!(transport.registration_count(fd), 0);
    }

    #[test]
    fn add_failure_is_reported_on_a_later_turn() {
        let reactor = Reactor::new().unwrap();
        let engine = FakeEngine::default();
        engine.0.borrow_mut().reject_adds = true;
        let transport = Transport::initialize(reactor.handle(), Box::new(engine.clone())).unwrap();

        let (slot, on_done) = capture();
        transport.get("not a url", vec![], on_done);
        assert!(slot.borrow().is_none());
        reactor.run_once();
        assert_eq!(
            slot.borrow().as_ref().unwrap().outcome,
            Err(TransferError::InvalidRequest("not a url".into()))
        );
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn notifications_coalesce_into_one_wake() {
        let reactor = Reactor::new().unwrap();
        let engine = FakeEngine::default();
        let transport = Transport::initialize(reactor.handle(), Box::new(engine.clone())).unwrap();

        let (first, on_first) = capture();
        let (second, on_second) = capture();
        transport.get("http://fake/a", vec![], on_first);
        transport.get("http://fake/b", vec![], on_second);

        engine.complete_externally(1, Ok(204));
        engine.complete_externally(2, Ok(503));
        run_until(&reactor, || second.borrow().is_some());

        assert_eq!(engine.wakes(), 1);
        assert_eq!(first.borrow().as_ref().unwrap().status, 204);
        assert_eq!(second.borrow().as_ref().unwrap().status, 503);
    }

    #[test]
    fn shutdown_fails_pending_and_later_requests() {
        let reactor = Reactor::new().unwrap();
        let engine = FakeEngine::default();
        let transport = Transport::initialize(reactor.handle(), Box::new(engine.clone())).unwrap();

        let (pending, on_pending) = capture();
        transport.get("http://fake/a", vec![], on_pending);
        let fd = engine.fd(1);
        transport.shutdown();
        assert!(!transport.is_open());
        assert_eq!(transport.registration_count(fd), 0);

        let (late, on_late) = capture();
        transport.get("http://fake/b", vec![], on_late);
        run_until(&reactor, || late.borrow().is_some() && pending.borrow().is_some());

        assert_eq!(pending.borrow().as_ref().unwrap().outcome, Err(TransferError::Shutdown));
        assert_eq!(late.borrow().as_ref().unwrap().outcome, Err(TransferError::Shutdown));
    }
}
