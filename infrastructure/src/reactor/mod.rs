//! Single-threaded event loop shared by every I/O component.
//!
//! The [`Reactor`] owns a tokio current-thread runtime and a [`LocalSet`].
//! Components never touch tokio directly: they ask a [`ReactorHandle`] for
//! owned primitives and receive callbacks on the reactor thread.
//!
//! | Primitive | Created by | Callback |
//! |-----------|------------|----------|
//! | [`Timer`] | [`create_timer`](ReactorHandle::create_timer) | after a delay, optionally repeating |
//! | [`Hook`] (idle) | [`create_idle`](ReactorHandle::create_idle) | when a loop turn found nothing to do |
//! | [`Hook`] (prepare) | [`create_prepare`](ReactorHandle::create_prepare) | before each blocking turn |
//! | [`FsWatch`] | [`create_fs_watch`](ReactorHandle::create_fs_watch) | path created / modified / removed |
//! | [`Socket`] | [`create_socket`](ReactorHandle::create_socket), [`connect`](ReactorHandle::connect) | bytes read, write completed |
//! | [`Poll`] | [`create_poll`](ReactorHandle::create_poll) | raw descriptor readiness |
//!
//! Every primitive is owned by its creator and stops when dropped. Callback
//! state lives in `Rc`/`RefCell`; nothing here is `Send`.

mod fs_watch;
mod hook;
#[cfg(unix)]
mod poll;
mod socket;
mod timer;

pub use fs_watch::{FsEvent, FsWatch};
pub use hook::{Hook, HookKind};
#[cfg(unix)]
pub use poll::{Poll, Readiness};
pub use socket::{Socket, SocketError, WriteCallback};
pub use timer::Timer;

use puppet_application::ports::scheduler::{Scheduler, TimerHandle};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Errors raised while bringing the event loop up.
#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("Failed to initialize event loop: {0}")]
    Init(#[source] io::Error),
}

/// Counts callbacks delivered by the loop and wakes a blocked
/// [`Reactor::run_once`].
#[derive(Default)]
pub(crate) struct Dispatch {
    count: Cell<u64>,
    wake: Notify,
}

impl Dispatch {
    /// Invoke one loop callback.
    pub(crate) fn run<R>(&self, callback: impl FnOnce() -> R) -> R {
        self.count.set(self.count.get() + 1);
        let out = callback();
        self.wake.notify_one();
        out
    }

    fn count(&self) -> u64 {
        self.count.get()
    }
}

struct ReactorShared {
    local: Rc<LocalSet>,
    runtime: tokio::runtime::Handle,
    dispatch: Rc<Dispatch>,
    hooks: RefCell<Vec<Weak<hook::HookSlot>>>,
    stop: RefCell<CancellationToken>,
}

/// Cheap clonable handle to the reactor.
///
/// Primitives created through a handle keep working for as long as the
/// owning [`Reactor`] is driven.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Rc<ReactorShared>,
}

impl ReactorHandle {
    /// Run `callback` on a later loop turn, never nested in the caller.
    pub fn defer(&self, callback: impl FnOnce() + 'static) {
        let dispatch = Rc::clone(&self.shared.dispatch);
        self.shared.local.spawn_local(async move {
            dispatch.run(callback);
        });
    }

    pub fn create_timer(&self) -> Timer {
        Timer::new(self.clone())
    }

    pub fn create_idle(&self) -> Hook {
        self.create_hook(HookKind::Idle)
    }

    pub fn create_prepare(&self) -> Hook {
        self.create_hook(HookKind::Prepare)
    }

    pub fn create_fs_watch(&self) -> FsWatch {
        FsWatch::new(self.clone())
    }

    /// Wrap an already connected stream.
    pub fn create_socket(&self, stream: std::net::TcpStream) -> io::Result<Socket> {
        stream.set_nonblocking(true)?;
        let _guard = self.shared.runtime.enter();
        let stream = tokio::net::TcpStream::from_std(stream)?;
        Ok(Socket::new(self.clone(), stream))
    }

    /// Connect to `addr` in the background and hand the socket to `on_connect`.
    pub fn connect(
        &self,
        addr: impl Into<String>,
        on_connect: impl FnOnce(io::Result<Socket>) + 'static,
    ) {
        let addr = addr.into();
        let handle = self.clone();
        let dispatch = Rc::clone(&self.shared.dispatch);
        self.shared.local.spawn_local(async move {
            debug!("Connecting to {}", addr);
            let result = tokio::net::TcpStream::connect(addr.as_str())
                .await
                .map(|stream| Socket::new(handle, stream));
            dispatch.run(|| on_connect(result));
        });
    }

    /// Register a raw descriptor for readiness callbacks.
    ///
    /// The descriptor stays owned by the caller.
    ///
    /// # Safety
    ///
    /// `fd` must stay open, and refer to the same open file description,
    /// until the returned [`Poll`] is dropped.
    #[cfg(unix)]
    pub unsafe fn create_poll(&self, fd: std::os::fd::RawFd) -> io::Result<Poll> {
        let _guard = self.shared.runtime.enter();
        // SAFETY: forwarded from this function's contract.
        unsafe { Poll::new(self.clone(), fd) }
    }

    /// Ask a running [`Reactor::run_forever`] to return.
    pub fn stop(&self) {
        debug!("Reactor stop requested");
        self.shared.stop.borrow().cancel();
    }

    pub(crate) fn dispatch(&self) -> Rc<Dispatch> {
        Rc::clone(&self.shared.dispatch)
    }

    pub(crate) fn spawn_local<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.shared.local.spawn_local(future)
    }

    fn create_hook(&self, kind: HookKind) -> Hook {
        let hook = Hook::new(kind);
        self.shared.hooks.borrow_mut().push(hook.slot());
        hook
    }

    /// Run every started hook of `kind`. Returns how many ran.
    fn run_hooks(&self, kind: HookKind) -> usize {
        let slots: Vec<_> = {
            let mut hooks = self.shared.hooks.borrow_mut();
            hooks.retain(|slot| slot.strong_count() > 0);
            hooks
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|slot| slot.kind() == kind && slot.is_active())
                .collect()
        };
        for slot in &slots {
            match kind {
                HookKind::Prepare => slot.fire(),
                HookKind::Idle => self.shared.dispatch.run(|| slot.fire()),
            }
        }
        slots.len()
    }

    fn has_active_hooks(&self, kind: HookKind) -> bool {
        self.shared
            .hooks
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|slot| slot.kind() == kind && slot.is_active())
    }

    fn stop_token(&self) -> CancellationToken {
        self.shared.stop.borrow().clone()
    }
}

impl Scheduler for ReactorHandle {
    fn defer(&self, callback: Box<dyn FnOnce()>) {
        ReactorHandle::defer(self, callback);
    }

    fn create_timer(&self) -> Box<dyn TimerHandle> {
        Box::new(ReactorHandle::create_timer(self))
    }
}

/// The event loop itself. Lives on one thread for the life of the process.
pub struct Reactor {
    runtime: Runtime,
    local: Rc<LocalSet>,
    handle: ReactorHandle,
}

impl Reactor {
    /// Build the loop. Failure here is fatal for the process.
    pub fn new() -> Result<Self, ReactorError> {
        Self::with_builder(Builder::new_current_thread().enable_all())
    }

    fn with_builder(builder: &mut Builder) -> Result<Self, ReactorError> {
        let runtime = builder.build().map_err(ReactorError::Init)?;
        let local = Rc::new(LocalSet::new());
        let handle = ReactorHandle {
            shared: Rc::new(ReactorShared {
                local: Rc::clone(&local),
                runtime: runtime.handle().clone(),
                dispatch: Rc::new(Dispatch::default()),
                hooks: RefCell::new(Vec::new()),
                stop: RefCell::new(CancellationToken::new()),
            }),
        };
        debug!("Reactor initialized");
        Ok(Self {
            runtime,
            local,
            handle,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// One loop turn.
    ///
    /// Runs prepare hooks, then blocks until at least one callback has been
    /// dispatched. With idle hooks started the turn does not block: it
    /// polls ready work once and runs the idle hooks if nothing was ready.
    /// Returns the number of callbacks dispatched.
    pub fn run_once(&self) -> u64 {
        self.handle.run_hooks(HookKind::Prepare);

        let dispatch = self.handle.dispatch();
        let before = dispatch.count();
        let idle = self.handle.has_active_hooks(HookKind::Idle);
        // A stop left over from an earlier run must not end this turn early.
        if self.handle.stop_token().is_cancelled() {
            self.reset_stop();
        }
        let stop = self.handle.stop_token();

        self.runtime.block_on(self.local.run_until(async {
            if idle {
                tokio::task::yield_now().await;
                return;
            }
            while dispatch.count() == before && !stop.is_cancelled() {
                tokio::select! {
                    _ = dispatch.wake.notified() => {}
                    _ = stop.cancelled() => {}
                }
            }
        }));

        if idle && dispatch.count() == before {
            self.handle.run_hooks(HookKind::Idle);
        }
        let ran = dispatch.count() - before;
        trace!("Reactor turn dispatched {} callbacks", ran);
        ran
    }

    /// Turn the loop until [`stop`](Self::stop) is called.
    pub fn run_forever(&self) {
        let stop = self.handle.stop_token();
        while !stop.is_cancelled() {
            self.run_once();
        }
        self.reset_stop();
        debug!("Reactor stopped");
    }

    /// Drive the loop until stopped or until `limit` elapses.
    ///
    /// Returns `true` when the loop was stopped, `false` on timeout.
    pub fn run_until_stopped_or(&self, limit: Duration) -> bool {
        let stop = self.handle.stop_token();
        let stopped = self.runtime.block_on(self.local.run_until(async {
            tokio::select! {
                _ = stop.cancelled() => true,
                _ = tokio::time::sleep(limit) => false,
            }
        }));
        self.reset_stop();
        stopped
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    fn reset_stop(&self) {
        *self.handle.shared.stop.borrow_mut() = CancellationToken::new();
    }

    /// Reactor whose clock only moves when the loop is otherwise idle.
    #[cfg(test)]
    pub(crate) fn paused() -> Self {
        match Self::with_builder(Builder::new_current_thread().enable_all().start_paused(true)) {
            Ok(reactor) => reactor,
            Err(e) => panic!("paused reactor: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn deferred_callbacks_run_on_a_later_turn() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = Rc::clone(&order);
        handle.defer(move || o.borrow_mut().push("deferred"));
        order.borrow_mut().push("caller");

        assert!(reactor.run_once() >= 1);
        assert_eq!(*order.borrow(), vec!["caller", "deferred"]);
    }

    #[test]
    fn run_once_blocks_until_a_timer_fires() {
        let reactor = Reactor::paused();
        let handle = reactor.handle();
        let fired = Rc::new(Cell::new(false));

        let mut timer = handle.create_timer();
        let f = Rc::clone(&fired);
        timer.start(Duration::from_secs(3), Duration::ZERO, Box::new(move || f.set(true)));

        assert_eq!(reactor.run_once(), 1);
        assert!(fired.get());
        assert!(!timer.is_active());
    }

    #[test]
    fn prepare_runs_each_turn_and_idle_runs_when_nothing_is_ready() {
        let reactor = Reactor::paused();
        let handle = reactor.handle();
        let prepared = Rc::new(Cell::new(0));
        let idled = Rc::new(Cell::new(0));

        let mut prepare = handle.create_prepare();
        let p = Rc::clone(&prepared);
        prepare.start(move || p.set(p.get() + 1));
        let mut idle = handle.create_idle();
        let i = Rc::clone(&idled);
        idle.start(move || i.set(i.get() + 1));

        assert_eq!(reactor.run_once(), 1);
        assert_eq!(reactor.run_once(), 1);
        assert_eq!(prepared.get(), 2);
        assert_eq!(idled.get(), 2);

        idle.stop();
        handle.defer(|| {});
        assert_eq!(reactor.run_once(), 1);
        assert_eq!(idled.get(), 2);
        assert_eq!(prepared.get(), 3);
    }

    #[test]
    fn stop_from_a_callback_ends_run_forever() {
        let reactor = Reactor::paused();
        let handle = reactor.handle();
        let ticks = Rc::new(Cell::new(0));

        let mut timer = handle.create_timer();
        let t = Rc::clone(&ticks);
        let h = handle.clone();
        timer.start(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Box::new(move || {
                t.set(t.get() + 1);
                if t.get() == 5 {
                    h.stop();
                }
            }),
        );

        reactor.run_forever();
        assert_eq!(ticks.get(), 5);
    }

    #[test]
    fn stop_requested_while_idle_does_not_skip_the_next_turn() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let ran = Rc::new(Cell::new(false));

        handle.stop();
        let r = Rc::clone(&ran);
        handle.defer(move || r.set(true));

        assert_eq!(reactor.run_once(), 1);
        assert!(ran.get());
        assert!(!handle.stop_token().is_cancelled());
    }

    #[test]
    fn run_until_stopped_or_times_out() {
        let reactor = Reactor::paused();
        assert!(!reactor.run_until_stopped_or(Duration::from_secs(1)));

        let handle = reactor.handle();
        let h = handle.clone();
        handle.defer(move || h.stop());
        assert!(reactor.run_until_stopped_or(Duration::from_secs(60)));
    }

    #[test]
    fn handle_serves_as_scheduler() {
        let reactor = Reactor::paused();
        let scheduler: Rc<dyn Scheduler> = Rc::new(reactor.handle());
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        scheduler.defer(Box::new(move || h.set(h.get() + 1)));
        let mut timer = scheduler.create_timer();
        let h = Rc::clone(&hits);
        timer.start(Duration::from_secs(10), Duration::ZERO, Box::new(move || h.set(h.get() + 10)));

        while hits.get() < 11 {
            reactor.run_once();
        }
        assert!(!timer.is_active());
    }
}
