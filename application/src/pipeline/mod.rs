//! Ordered single-flight retry queue.
//!
//! [`RequestPipeline`] serializes a backlog of asynchronous tasks so that
//! exactly one is in flight at a time, in submission order:
//!
//! ```text
//! submit ──► queue ──► advance ──► [credential] ──► task(token, resolver)
//!                ▲                                        │
//!                │     Advance / Reject: pop, advance ◄───┤
//!                └──── Retry: keep head, timer(delay) ◄───┘
//! ```
//!
//! Every adapter owns one pipeline. Continuations hold only a `Weak`
//! reference to the pipeline, so a late completion after the owner is
//! dropped does nothing.

mod resolver;

pub use resolver::Resolver;

use crate::ports::credential_source::CredentialSource;
use crate::ports::scheduler::{Scheduler, TimerHandle};
use puppet_domain::{BearerToken, Disposition, PipelineState};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default delay before a task that reported [`Disposition::Retry`] runs again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// A queued unit of work.
///
/// `Fn` rather than `FnMut`: a retried task runs again with exactly the
/// same captured input.
pub type Task = Rc<dyn Fn(Option<BearerToken>, Resolver)>;

struct Queued {
    id: u64,
    run: Task,
}

struct PipelineCore {
    queue: VecDeque<Queued>,
    state: PipelineState,
    /// Attempt currently allowed to resolve.
    in_flight: Option<u64>,
    next_attempt: u64,
    next_task_id: u64,
    retry_timer: Box<dyn TimerHandle>,
    last_error: Option<String>,
    attempts: u64,
}

pub(crate) struct PipelineInner {
    name: String,
    credentials: Option<Rc<dyn CredentialSource>>,
    retry_delay: Duration,
    core: RefCell<PipelineCore>,
}

/// Generic ordered single-flight retry queue.
pub struct RequestPipeline {
    inner: Rc<PipelineInner>,
}

impl RequestPipeline {
    /// Create a pipeline.
    ///
    /// When `credentials` is set, a token is obtained before every attempt
    /// and handed to the task.
    pub fn new(
        name: impl Into<String>,
        scheduler: &dyn Scheduler,
        credentials: Option<Rc<dyn CredentialSource>>,
        retry_delay: Duration,
    ) -> Self {
        let core = PipelineCore {
            queue: VecDeque::new(),
            state: PipelineState::Idle,
            in_flight: None,
            next_attempt: 0,
            next_task_id: 0,
            retry_timer: scheduler.create_timer(),
            last_error: None,
            attempts: 0,
        };
        Self {
            inner: Rc::new(PipelineInner {
                name: name.into(),
                credentials,
                retry_delay,
                core: RefCell::new(core),
            }),
        }
    }

    /// Append a task; starts it immediately when the pipeline is idle.
    ///
    /// Returns the task's queue id.
    pub fn submit<F>(&self, task: F) -> u64
    where
        F: Fn(Option<BearerToken>, Resolver) + 'static,
    {
        let id = {
            let mut core = self.inner.core.borrow_mut();
            let id = core.next_task_id;
            core.next_task_id += 1;
            core.queue.push_back(Queued {
                id,
                run: Rc::new(task),
            });
            trace!(pipeline = %self.inner.name, task = id, queued = core.queue.len(), "Task submitted");
            id
        };
        self.inner.advance();
        id
    }

    pub fn state(&self) -> PipelineState {
        self.inner.core.borrow().state
    }

    /// Tasks in the queue, including the active head.
    pub fn len(&self) -> usize {
        self.inner.core.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the head task, if any.
    pub fn head(&self) -> Option<u64> {
        self.inner.core.borrow().queue.front().map(|q| q.id)
    }

    /// Total attempts started (first runs and retries).
    pub fn attempts(&self) -> u64 {
        self.inner.core.borrow().attempts
    }

    /// Most recent diagnostic recorded by a failed attempt.
    pub fn last_error(&self) -> Option<String> {
        self.inner.core.borrow().last_error.clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl PipelineInner {
    fn advance(self: &Rc<Self>) {
        let (task, task_id, attempt) = {
            let mut core = self.core.borrow_mut();
            if core.state == PipelineState::Waiting {
                return;
            }
            let Some(head) = core.queue.front() else {
                core.state = PipelineState::Idle;
                return;
            };
            let task = Rc::clone(&head.run);
            let task_id = head.id;
            let attempt = core.next_attempt;
            core.next_attempt += 1;
            core.in_flight = Some(attempt);
            core.state = PipelineState::Waiting;
            core.attempts += 1;
            (task, task_id, attempt)
        };

        debug!(pipeline = %self.name, task = task_id, attempt, "Starting task attempt");

        match &self.credentials {
            None => self.run(task, attempt, None),
            Some(source) => {
                let weak = Rc::downgrade(self);
                source.get(Box::new(move |result| {
                    let Some(inner) = weak.upgrade() else {
                        trace!("Pipeline dropped before credential arrived");
                        return;
                    };
                    match result {
                        Ok(token) => inner.run(task, attempt, Some(token)),
                        Err(e) => {
                            warn!(pipeline = %inner.name, "Credential unavailable: {}", e);
                            inner.finish(attempt, Disposition::Retry, Some(e.to_string()));
                        }
                    }
                }));
            }
        }
    }

    fn run(self: &Rc<Self>, task: Task, attempt: u64, token: Option<BearerToken>) {
        let resolver = Resolver::new(Rc::downgrade(self), attempt);
        task(token, resolver);
    }

    /// Apply one attempt's disposition. Stale or duplicate resolutions are ignored.
    pub(crate) fn finish(
        self: &Rc<Self>,
        attempt: u64,
        disposition: Disposition,
        error: Option<String>,
    ) {
        {
            let mut core = self.core.borrow_mut();
            if core.in_flight != Some(attempt) {
                warn!(
                    pipeline = %self.name,
                    attempt,
                    "Ignoring resolution for an attempt that is no longer in flight"
                );
                return;
            }
            core.in_flight = None;
            if let Some(error) = error {
                core.last_error = Some(error);
            }

            match disposition {
                Disposition::Advance | Disposition::Reject => {
                    let popped = core.queue.pop_front().map(|q| q.id);
                    debug!(pipeline = %self.name, task = ?popped, ?disposition, "Task finished");
                    core.state = PipelineState::Idle;
                }
                Disposition::Retry => {
                    debug!(
                        pipeline = %self.name,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Task will be retried"
                    );
                    let weak = Rc::downgrade(self);
                    core.retry_timer.start(
                        self.retry_delay,
                        Duration::ZERO,
                        Box::new(move || {
                            if let Some(inner) = weak.upgrade() {
                                inner.core.borrow_mut().state = PipelineState::Idle;
                                inner.advance();
                            }
                        }),
                    );
                    return;
                }
            }
        }
        self.advance();
    }

    pub(crate) fn is_in_flight(&self, attempt: u64) -> bool {
        self.core.borrow().in_flight == Some(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::credential_source::{CredentialCallback, CredentialError};
    use crate::testing::ManualScheduler;
    use std::cell::{Cell, RefCell};

    type Held = Rc<RefCell<Vec<(String, Resolver)>>>;

    /// Submits a task that records its label and parks the resolver.
    fn submit_held(pipeline: &RequestPipeline, held: &Held, label: &str) {
        let held = Rc::clone(held);
        let label = label.to_string();
        pipeline.submit(move |_, resolver| {
            held.borrow_mut().push((label.clone(), resolver));
        });
    }

    fn take(held: &Held) -> (String, Resolver) {
        held.borrow_mut().remove(0)
    }

    fn pipeline(scheduler: &ManualScheduler) -> RequestPipeline {
        RequestPipeline::new("test", scheduler, None, DEFAULT_RETRY_DELAY)
    }

    #[test]
    fn single_flight_with_backlog() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let held: Held = Rc::default();

        submit_held(&pipeline, &held, "a");
        submit_held(&pipeline, &held, "b");
        submit_held(&pipeline, &held, "c");

        // Only the head started; the other two are queued.
        assert_eq!(held.borrow().len(), 1);
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.state(), PipelineState::Waiting);

        let (label, resolver) = take(&held);
        assert_eq!(label, "a");
        resolver.resolve(Disposition::Advance);

        // Backlog drains without external prompting.
        assert_eq!(held.borrow().len(), 1);
        assert_eq!(held.borrow()[0].0, "b");
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn order_preserved_across_retries() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let held: Held = Rc::default();

        submit_held(&pipeline, &held, "a");
        submit_held(&pipeline, &held, "b");

        let (_, resolver) = take(&held);
        resolver.resolve(Disposition::Retry);
        assert!(held.borrow().is_empty(), "b must not start while a is pending retry");
        assert_eq!(pipeline.state(), PipelineState::Waiting);

        scheduler.advance(Duration::from_secs(9));
        assert!(held.borrow().is_empty());

        scheduler.advance(Duration::from_secs(1));
        let (label, resolver) = take(&held);
        assert_eq!(label, "a");
        resolver.resolve(Disposition::Advance);

        let (label, resolver) = take(&held);
        assert_eq!(label, "b");
        resolver.resolve(Disposition::Advance);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.attempts(), 3);
    }

    #[test]
    fn reject_pops_and_continues() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let held: Held = Rc::default();

        submit_held(&pipeline, &held, "a");
        submit_held(&pipeline, &held, "b");

        let (_, resolver) = take(&held);
        resolver.fail(Disposition::Reject, "HTTP 400: bad request");
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.last_error().as_deref(), Some("HTTP 400: bad request"));
        assert_eq!(held.borrow()[0].0, "b");
    }

    #[test]
    fn retry_runs_identical_task() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let input = vec![1u8, 2, 3];

        let seen_in = Rc::clone(&seen);
        pipeline.submit(move |_, resolver| {
            seen_in.borrow_mut().push(input.clone());
            let disposition = if seen_in.borrow().len() < 3 {
                Disposition::Retry
            } else {
                Disposition::Advance
            };
            resolver.resolve(disposition);
        });

        scheduler.advance(Duration::from_secs(30));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|attempt| attempt == &[1, 2, 3]));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn dropped_resolver_counts_as_retry() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let runs = Rc::new(Cell::new(0));

        let runs_in = Rc::clone(&runs);
        pipeline.submit(move |_, resolver| {
            runs_in.set(runs_in.get() + 1);
            if runs_in.get() == 2 {
                resolver.resolve(Disposition::Advance);
            }
            // First attempt drops the resolver unresolved.
        });

        assert_eq!(runs.get(), 1);
        assert_eq!(pipeline.state(), PipelineState::Waiting);
        scheduler.advance(DEFAULT_RETRY_DELAY);
        assert_eq!(runs.get(), 2);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn resolving_after_pipeline_dropped_is_noop() {
        let scheduler = ManualScheduler::new();
        let pipeline = pipeline(&scheduler);
        let held: Held = Rc::default();
        submit_held(&pipeline, &held, "a");

        drop(pipeline);
        let (_, resolver) = take(&held);
        assert!(!resolver.is_live());
        resolver.resolve(Disposition::Advance);
        scheduler.advance(Duration::from_secs(60));
    }

    struct FailingSource {
        calls: Cell<u32>,
        scheduler: ManualScheduler,
    }

    impl CredentialSource for FailingSource {
        fn get(&self, callback: CredentialCallback) {
            self.calls.set(self.calls.get() + 1);
            self.scheduler.defer(Box::new(move || {
                callback(Err(CredentialError::Fetch("HTTP 503".into())))
            }));
        }

        fn invalidate(&self) {}
    }

    #[test]
    fn credential_failure_retries_after_delay() {
        let scheduler = ManualScheduler::new();
        let source = Rc::new(FailingSource {
            calls: Cell::new(0),
            scheduler: scheduler.clone(),
        });
        let pipeline = RequestPipeline::new(
            "auth",
            &scheduler,
            Some(source.clone() as Rc<dyn CredentialSource>),
            DEFAULT_RETRY_DELAY,
        );
        let runs = Rc::new(Cell::new(0));
        let runs_in = Rc::clone(&runs);
        pipeline.submit(move |_, _| runs_in.set(runs_in.get() + 1));

        scheduler.run_pending();
        assert_eq!(source.calls.get(), 1);
        assert_eq!(runs.get(), 0);
        assert_eq!(
            pipeline.last_error().as_deref(),
            Some("Token request failed: HTTP 503")
        );

        scheduler.advance(DEFAULT_RETRY_DELAY);
        assert_eq!(source.calls.get(), 2);
        assert_eq!(pipeline.len(), 1);
    }
}
