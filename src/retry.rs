use std::fmt::Display;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::config::{RetrySettings, secs};

/// `max_retries` counts attempts in total. After a retryable failure on
/// attempt `i` (zero-based) the caller sleeps `base_delay * backoff_factor^i`;
/// the final failed attempt returns its error without sleeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: secs(settings.base_delay_secs),
            backoff_factor: settings.backoff_factor,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        secs(self.base_delay.as_secs_f64() * factor)
    }

    pub fn execute<T, E, F, P>(
        &self,
        clock: &dyn Clock,
        operation: F,
        is_retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max = self.max_retries.max(1);
        self.execute_with(clock, operation, is_retryable, |err: &E, attempt, delay| {
            debug!(
                attempt,
                max_retries = max,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "retrying"
            );
        })
    }

    pub fn execute_with<T, E, F, P, C>(
        &self,
        clock: &dyn Clock,
        mut operation: F,
        is_retryable: P,
        mut on_retry: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        C: FnMut(&E, u32, Duration),
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable(&err) || attempt + 1 >= attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    on_retry(&err, attempt + 1, delay);
                    clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
