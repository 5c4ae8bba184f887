//! Request pipeline settings.

use crate::pipeline::DEFAULT_RETRY_DELAY;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Delay before a transiently failed task is attempted again.
    pub retry_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl PipelineSettings {
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
