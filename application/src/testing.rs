//! Test doubles for the scheduler and HTTP ports.
//!
//! - [`ManualScheduler`]: virtual clock; timers fire only when the test
//!   calls [`advance`](ManualScheduler::advance).
//! - [`ScriptedHttpClient`]: records requests and answers them from a
//!   script (or holds them until the test completes them by hand).
//!
//! Both deliver callbacks through the deferred queue, never synchronously,
//! matching the contract of the real reactor and transport.

use crate::ports::http_client::{HttpCallback, HttpClient};
use crate::ports::scheduler::{Scheduler, TimerHandle};
use puppet_domain::{Headers, HttpRequest, HttpResponse};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

// ==================== ManualScheduler ====================

struct TimerSlot {
    deadline: Cell<Option<Duration>>,
    repeat: Cell<Duration>,
    callback: RefCell<Option<Box<dyn FnMut()>>>,
    generation: Cell<u64>,
    order: u64,
}

#[derive(Default)]
struct ManualInner {
    now: Cell<Duration>,
    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    timers: RefCell<Vec<Weak<TimerSlot>>>,
    next_order: Cell<u64>,
}

/// Scheduler driven by an explicit virtual clock.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<ManualInner>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// Run deferred callbacks until none are left. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.deferred.borrow_mut().pop_front();
            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the clock forward, firing due timers in deadline order and
    /// running deferred callbacks in between.
    pub fn advance(&self, by: Duration) {
        let target = self.inner.now.get() + by;
        loop {
            self.run_pending();
            let Some(slot) = self.next_due(target) else {
                break;
            };
            let Some(deadline) = slot.deadline.get() else {
                continue;
            };
            self.inner.now.set(deadline);
            self.fire(&slot, deadline);
        }
        self.inner.now.set(target);
        self.run_pending();
    }

    /// Timers currently armed.
    pub fn active_timers(&self) -> usize {
        self.inner
            .timers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.deadline.get().is_some())
            .count()
    }

    fn next_due(&self, target: Duration) -> Option<Rc<TimerSlot>> {
        let mut timers = self.inner.timers.borrow_mut();
        timers.retain(|slot| slot.strong_count() > 0);
        timers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.deadline.get().is_some_and(|d| d <= target))
            .min_by_key(|slot| (slot.deadline.get(), slot.order))
    }

    fn fire(&self, slot: &Rc<TimerSlot>, deadline: Duration) {
        let generation = slot.generation.get();
        let repeat = slot.repeat.get();
        slot.deadline
            .set((!repeat.is_zero()).then(|| deadline + repeat));
        let callback = slot.callback.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
            // Put the callback back unless it restarted or stopped its own timer.
            if slot.generation.get() == generation && !repeat.is_zero() {
                *slot.callback.borrow_mut() = Some(callback);
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, callback: Box<dyn FnOnce()>) {
        self.inner.deferred.borrow_mut().push_back(callback);
    }

    fn create_timer(&self) -> Box<dyn TimerHandle> {
        let order = self.inner.next_order.get();
        self.inner.next_order.set(order + 1);
        let slot = Rc::new(TimerSlot {
            deadline: Cell::new(None),
            repeat: Cell::new(Duration::ZERO),
            callback: RefCell::new(None),
            generation: Cell::new(0),
            order,
        });
        self.inner.timers.borrow_mut().push(Rc::downgrade(&slot));
        Box::new(ManualTimer {
            slot,
            clock: Rc::downgrade(&self.inner),
        })
    }
}

struct ManualTimer {
    slot: Rc<TimerSlot>,
    clock: Weak<ManualInner>,
}

impl TimerHandle for ManualTimer {
    fn start(&mut self, delay: Duration, repeat: Duration, callback: Box<dyn FnMut()>) {
        let now = self.clock.upgrade().map(|c| c.now.get()).unwrap_or_default();
        self.slot.generation.set(self.slot.generation.get() + 1);
        self.slot.deadline.set(Some(now + delay));
        self.slot.repeat.set(repeat);
        *self.slot.callback.borrow_mut() = Some(callback);
    }

    fn stop(&mut self) {
        self.slot.generation.set(self.slot.generation.get() + 1);
        self.slot.deadline.set(None);
        self.slot.callback.borrow_mut().take();
    }

    fn is_active(&self) -> bool {
        self.slot.deadline.get().is_some()
    }
}

// ==================== ScriptedHttpClient ====================

struct Rule {
    url_fragment: String,
    response: HttpResponse,
    /// `None` ⇒ answer every matching request.
    remaining: Option<usize>,
}

struct Held {
    request: HttpRequest,
    on_done: HttpCallback,
}

struct ScriptedInner {
    scheduler: Rc<dyn Scheduler>,
    requests: RefCell<Vec<HttpRequest>>,
    rules: RefCell<Vec<Rule>>,
    held: RefCell<Vec<Held>>,
}

/// HTTP client answering from a script.
///
/// Rules are matched against the request URL in insertion order; a
/// one-shot rule is consumed by its first match. Requests matching no rule
/// are held until [`complete_held`](Self::complete_held).
#[derive(Clone)]
pub struct ScriptedHttpClient {
    inner: Rc<ScriptedInner>,
}

impl ScriptedHttpClient {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(ScriptedInner {
                scheduler,
                requests: RefCell::new(Vec::new()),
                rules: RefCell::new(Vec::new()),
                held: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Answer the next request whose URL contains `url_fragment`.
    pub fn respond_once(&self, url_fragment: &str, response: HttpResponse) -> &Self {
        self.push_rule(url_fragment, response, Some(1))
    }

    /// Answer every request whose URL contains `url_fragment`.
    pub fn respond_always(&self, url_fragment: &str, response: HttpResponse) -> &Self {
        self.push_rule(url_fragment, response, None)
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.borrow().clone()
    }

    /// Number of requests whose URL contains `url_fragment`.
    pub fn count(&self, url_fragment: &str) -> usize {
        self.inner
            .requests
            .borrow()
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .count()
    }

    /// Requests waiting for a manual answer.
    pub fn held(&self) -> usize {
        self.inner.held.borrow().len()
    }

    /// Answer the oldest held request (through the deferred queue).
    pub fn complete_held(&self, response: HttpResponse) -> Option<HttpRequest> {
        let held = {
            let mut held = self.inner.held.borrow_mut();
            if held.is_empty() {
                return None;
            }
            held.remove(0)
        };
        let request = held.request.clone();
        let on_done = held.on_done;
        self.inner
            .scheduler
            .defer(Box::new(move || on_done(response)));
        Some(request)
    }

    fn push_rule(&self, url_fragment: &str, response: HttpResponse, remaining: Option<usize>) -> &Self {
        self.inner.rules.borrow_mut().push(Rule {
            url_fragment: url_fragment.to_string(),
            response,
            remaining,
        });
        self
    }

    fn dispatch(&self, request: HttpRequest, on_done: HttpCallback) {
        self.inner.requests.borrow_mut().push(request.clone());
        let response = {
            let mut rules = self.inner.rules.borrow_mut();
            let index = rules
                .iter()
                .position(|rule| request.url.contains(&rule.url_fragment));
            index.map(|i| {
                let response = rules[i].response.clone();
                if let Some(remaining) = rules[i].remaining.as_mut() {
                    *remaining -= 1;
                    if *remaining == 0 {
                        rules.remove(i);
                    }
                }
                response
            })
        };
        match response {
            Some(response) => self
                .inner
                .scheduler
                .defer(Box::new(move || on_done(response))),
            None => self.inner.held.borrow_mut().push(Held { request, on_done }),
        }
    }
}

impl HttpClient for ScriptedHttpClient {
    fn get(&self, url: &str, headers: Headers, on_done: HttpCallback) {
        self.dispatch(HttpRequest::get(url).with_headers(headers), on_done);
    }

    fn post(&self, url: &str, body: Vec<u8>, headers: Headers, on_done: HttpCallback) {
        self.dispatch(HttpRequest::post(url, body).with_headers(headers), on_done);
    }
}
