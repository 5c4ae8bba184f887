//! Scheduler port
//!
//! The event loop as seen by the application layer: deferred callbacks and
//! owned timers. All callbacks run on the single reactor thread.

use std::time::Duration;

/// A timer owned by its creator. Dropping it stops it.
pub trait TimerHandle {
    /// Fire `callback` after `delay`, then every `repeat` (zero ⇒ one-shot).
    ///
    /// Starting an active timer replaces its previous schedule and callback.
    fn start(&mut self, delay: Duration, repeat: Duration, callback: Box<dyn FnMut()>);

    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Event-loop services needed by pipelines, brokers and adapters.
pub trait Scheduler {
    /// Run `callback` on a later loop iteration, never nested in the caller.
    fn defer(&self, callback: Box<dyn FnOnce()>);

    fn create_timer(&self) -> Box<dyn TimerHandle>;
}
