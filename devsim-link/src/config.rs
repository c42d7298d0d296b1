//! Link configuration.

use std::time::Duration;

use devsim_protocol::{Endpoint, RetryPolicy};

/// Where to find the simulator and how hard to try reaching it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    pub endpoint: Endpoint,
    pub retry: RetryPolicy,
}

impl LinkConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        LinkConfig {
            endpoint,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }
}
