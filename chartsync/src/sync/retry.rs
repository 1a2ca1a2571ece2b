use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(self.interval),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_INTERVAL)
    }
}
