use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{RateLimitSettings, secs};

pub trait Throttle: Send {
    fn wait(&mut self);
    fn delay(&self) -> Duration;
    fn on_success(&mut self) {}
    fn on_error(&mut self) {}
}

pub struct RateLimiter {
    delay: Duration,
    last_call: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            delay,
            last_call: None,
            clock,
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
        debug!(delay_secs = delay.as_secs_f64(), "rate limit delay updated");
    }

    pub fn reset(&mut self) {
        self.last_call = None;
    }
}

impl Throttle for RateLimiter {
    fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < self.delay {
                let remaining = self.delay - elapsed;
                debug!(sleep_secs = remaining.as_secs_f64(), "rate limiting");
                self.clock.sleep(remaining);
            }
        }
        self.last_call = Some(self.clock.now());
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

/// Each error multiplies the delay by `increase_factor` (capped at `max`);
/// every `success_threshold` consecutive successes multiply it by
/// `decrease_factor` (floored at `min`).
pub struct AdaptiveRateLimiter {
    inner: RateLimiter,
    min_delay: Duration,
    max_delay: Duration,
    increase_factor: f64,
    decrease_factor: f64,
    success_threshold: u32,
    consecutive_successes: u32,
}

impl AdaptiveRateLimiter {
    pub fn new(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RateLimiter::new(secs(settings.initial_delay_secs), clock),
            min_delay: secs(settings.min_delay_secs),
            max_delay: secs(settings.max_delay_secs),
            increase_factor: settings.increase_factor,
            decrease_factor: settings.decrease_factor,
            success_threshold: settings.success_threshold.max(1),
            consecutive_successes: 0,
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.inner.set_delay(delay);
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.consecutive_successes = 0;
    }
}

impl Throttle for AdaptiveRateLimiter {
    fn wait(&mut self) {
        self.inner.wait();
    }

    fn delay(&self) -> Duration {
        self.inner.delay
    }

    fn on_error(&mut self) {
        let old = self.inner.delay;
        let raised = scale(old, self.increase_factor).min(self.max_delay);
        self.inner.delay = raised;
        self.consecutive_successes = 0;
        if raised != old {
            info!(
                from_secs = old.as_secs_f64(),
                to_secs = raised.as_secs_f64(),
                "rate limit increased"
            );
        }
    }

    fn on_success(&mut self) {
        self.consecutive_successes += 1;
        if self.consecutive_successes < self.success_threshold {
            return;
        }
        let old = self.inner.delay;
        let lowered = scale(old, self.decrease_factor).max(self.min_delay);
        self.inner.delay = lowered;
        self.consecutive_successes = 0;
        if lowered != old {
            debug!(
                from_secs = old.as_secs_f64(),
                to_secs = lowered.as_secs_f64(),
                "rate limit decreased"
            );
        }
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    secs(delay.as_secs_f64() * factor)
}
