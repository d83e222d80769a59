//! Resolution session configuration.

use std::time::Duration;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Yield to the scheduler once before a consumer flushes, so siblings
    /// running on other tasks can still join the pending plans.
    pub yield_before_flush: bool,
    /// Split a plan's keys into invocations of at most this many keys.
    pub max_batch_size: Option<usize>,
    /// Fail an invocation that runs longer than this.
    pub batch_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            yield_before_flush: true,
            max_batch_size: None,
            batch_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn with_yield_before_flush(mut self, enabled: bool) -> Self {
        self.yield_before_flush = enabled;
        self
    }

    /// Sets the maximum keys per invocation. Zero is treated as unbounded.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = (size > 0).then_some(size);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }
}
