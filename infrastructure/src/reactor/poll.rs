//! Readiness notifications for descriptors owned elsewhere.

use super::ReactorHandle;
use std::cell::Cell;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Readiness interest, and readiness reported to a [`Poll`] callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Registration failed; no further callbacks follow.
    pub error: bool,
}

impl Readiness {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
        error: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
        error: false,
    };
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
        error: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    fn interest(&self) -> Option<Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// Borrowed descriptor; closing it stays with the owner.
struct Borrowed(RawFd);

impl AsRawFd for Borrowed {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A descriptor registered with the reactor.
///
/// Readiness is edge-style: each callback reports readiness observed since
/// the previous one, and the callee is expected to consume it.
pub struct Poll {
    reactor: ReactorHandle,
    fd: Rc<AsyncFd<Borrowed>>,
    task: Option<JoinHandle<()>>,
    stopped: Rc<Cell<bool>>,
}

impl Poll {
    /// # Safety
    ///
    /// `fd` must stay open and refer to the same file description until the
    /// returned value is dropped.
    pub(super) unsafe fn new(reactor: ReactorHandle, fd: RawFd) -> io::Result<Self> {
        let interest = Interest::READABLE.add(Interest::WRITABLE);
        // SAFETY: the caller guarantees `fd` outlives the registration.
        let fd = unsafe { AsyncFd::register_with_interest(Borrowed(fd), interest) }?;
        Ok(Self {
            reactor,
            fd: Rc::new(fd),
            task: None,
            stopped: Rc::new(Cell::new(false)),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.get_ref().0
    }

    /// Report `events` readiness to `callback` until stopped.
    pub fn start(&mut self, events: Readiness, mut callback: impl FnMut(Readiness) + 'static) {
        self.stop();
        let Some(interest) = events.interest() else {
            return;
        };
        let stopped = Rc::new(Cell::new(false));
        self.stopped = Rc::clone(&stopped);
        let fd = Rc::clone(&self.fd);
        let dispatch = self.reactor.dispatch();

        self.task = Some(self.reactor.spawn_local(async move {
            loop {
                let ready = match fd.ready(interest).await {
                    Ok(mut guard) => {
                        let ready = guard.ready();
                        guard.clear_ready();
                        Readiness {
                            readable: ready.is_readable() || ready.is_read_closed(),
                            writable: ready.is_writable() || ready.is_write_closed(),
                            error: false,
                        }
                    }
                    Err(e) => {
                        warn!("Poll on fd {} failed: {}", fd.get_ref().0, e);
                        Readiness {
                            error: true,
                            ..Readiness::default()
                        }
                    }
                };
                trace!("fd {} ready: {:?}", fd.get_ref().0, ready);
                dispatch.run(|| callback(ready));
                // The callback may have stopped or dropped this poll.
                if stopped.get() || ready.error {
                    return;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        self.stopped.set(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Poll {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::super::Reactor;
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readability_until_stopped() {
        let (ours, mut peer) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let reactor = Reactor::new().unwrap();

        // SAFETY: `ours` outlives `poll`.
        let mut poll = unsafe { reactor.handle().create_poll(ours.as_raw_fd()) }.unwrap();
        assert_eq!(poll.fd(), ours.as_raw_fd());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        poll.start(Readiness::READABLE, move |ready| s.borrow_mut().push(ready));
        assert!(poll.is_active());

        peer.write_all(b"x").unwrap();
        while seen.borrow().is_empty() {
            reactor.run_once();
        }
        assert!(seen.borrow()[0].readable);

        poll.stop();
        assert!(!poll.is_active());
    }

    #[test]
    fn empty_interest_registers_nothing() {
        let (ours, _peer) = UnixStream::pair().unwrap();
        let reactor = Reactor::new().unwrap();
        // SAFETY: `ours` outlives `poll`.
        let mut poll = unsafe { reactor.handle().create_poll(ours.as_raw_fd()) }.unwrap();
        poll.start(Readiness::default(), |_| {});
        assert!(!poll.is_active());
    }
}
