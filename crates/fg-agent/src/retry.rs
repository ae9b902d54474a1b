use std::time::Duration;

/// Exponential backoff for transport retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_retries: 8,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries, for one-shot operator actions
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff delay for retry attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return self.max_backoff;
        }

        let delay_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_backoff.as_secs_f64()))
    }
}
