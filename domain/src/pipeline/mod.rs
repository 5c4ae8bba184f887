//! Request pipeline vocabulary.
//!
//! A pipeline runs queued tasks one at a time. Each attempt ends with
//! exactly one [`Disposition`], which decides what happens to the head of
//! the queue.

pub mod backoff;

pub use backoff::Backoff;

use std::fmt;

/// Outcome a task reports back to its owning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The task succeeded (possibly with an empty result). Pop and continue.
    Advance,
    /// Transient failure. Keep the task at the head and retry after a delay.
    Retry,
    /// The request was well-formed but rejected. Pop without retrying.
    Reject,
}

impl Disposition {
    /// Whether the head task leaves the queue.
    pub fn pops(&self) -> bool {
        !matches!(self, Disposition::Retry)
    }
}

/// Pipeline state machine: `Idle` ⇄ `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    /// A task attempt (or its credential fetch, or a retry delay) is outstanding.
    Waiting,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Waiting => write!(f, "waiting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retry_keeps_the_head() {
        assert!(Disposition::Advance.pops());
        assert!(Disposition::Reject.pops());
        assert!(!Disposition::Retry.pops());
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(PipelineState::default(), PipelineState::Idle);
        assert_eq!(PipelineState::Waiting.to_string(), "waiting");
    }
}
