//! Completion-disposition handle passed to each task attempt.

use super::PipelineInner;
use puppet_domain::Disposition;
use std::rc::Weak;
use tracing::debug;

/// Reports the outcome of one task attempt back to its pipeline.
///
/// Consumed by value, so an attempt resolves at most once. Dropping an
/// unresolved `Resolver` counts as [`Disposition::Retry`], which keeps the
/// pipeline from stalling in `Waiting` when a continuation is discarded.
pub struct Resolver {
    pipeline: Weak<PipelineInner>,
    attempt: u64,
    resolved: bool,
}

impl Resolver {
    pub(super) fn new(pipeline: Weak<PipelineInner>, attempt: u64) -> Self {
        Self {
            pipeline,
            attempt,
            resolved: false,
        }
    }

    pub fn resolve(mut self, disposition: Disposition) {
        self.complete(disposition, None);
    }

    /// Resolve and record `error` as the pipeline's last error.
    pub fn fail(mut self, disposition: Disposition, error: impl Into<String>) {
        self.complete(disposition, Some(error.into()));
    }

    /// Whether the owning pipeline still exists and is waiting on this attempt.
    pub fn is_live(&self) -> bool {
        self.pipeline
            .upgrade()
            .is_some_and(|inner| inner.is_in_flight(self.attempt))
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    fn complete(&mut self, disposition: Disposition, error: Option<String>) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        match self.pipeline.upgrade() {
            Some(inner) => inner.finish(self.attempt, disposition, error),
            None => debug!(attempt = self.attempt, "Pipeline gone, dropping resolution"),
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if !self.resolved {
            debug!(attempt = self.attempt, "Resolver dropped unresolved, scheduling retry");
            self.complete(Disposition::Retry, None);
        }
    }
}
