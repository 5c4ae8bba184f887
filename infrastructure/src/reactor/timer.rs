//! One-shot and repeating timers.

use super::ReactorHandle;
use puppet_application::ports::scheduler::TimerHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A timer owned by its creator.
///
/// `start` replaces any previous schedule. A zero `repeat` makes the timer
/// one-shot. Dropping the timer stops it.
pub struct Timer {
    reactor: ReactorHandle,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    pub(super) fn new(reactor: ReactorHandle) -> Self {
        Self {
            reactor,
            task: None,
        }
    }

    pub fn start(&mut self, delay: Duration, repeat: Duration, mut callback: Box<dyn FnMut()>) {
        self.stop();
        let dispatch = self.reactor.dispatch();
        self.task = Some(self.reactor.spawn_local(async move {
            tokio::time::sleep(delay).await;
            dispatch.run(&mut callback);
            if repeat.is_zero() {
                return;
            }
            let mut ticks = tokio::time::interval_at(Instant::now() + repeat, repeat);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                dispatch.run(&mut callback);
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl TimerHandle for Timer {
    fn start(&mut self, delay: Duration, repeat: Duration, callback: Box<dyn FnMut()>) {
        Timer::start(self, delay, repeat, callback);
    }

    fn stop(&mut self) {
        Timer::stop(self);
    }

    fn is_active(&self) -> bool {
        Timer::is_active(self)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
