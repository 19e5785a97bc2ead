use std::time::Duration;

/// Delay before each automatic reconnect attempt after a dropped connection.
///
/// The first attempt fires immediately, every later one waits the fixed
/// reconnect delay. There is no attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    reconnect_delay: Duration,
}

impl RetryPolicy {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { reconnect_delay }
    }

    pub fn next_retry_delay(&self, previous_retry_count: u32) -> Duration {
        if previous_retry_count == 0 {
            Duration::ZERO
        } else {
            self.reconnect_delay
        }
    }
}
