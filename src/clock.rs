use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::CarbotaxError;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// May return early once an attached interrupt fires.
    fn sleep(&self, duration: Duration);

    fn check_interrupt(&self) -> Result<(), CarbotaxError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CarbotaxError> {
        if self.is_triggered() {
            Err(CarbotaxError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    interrupt: Option<Interrupt>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interruptible(interrupt: Interrupt) -> Self {
        Self {
            interrupt: Some(interrupt),
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|interrupt| interrupt.is_triggered())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.interrupted() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn check_interrupt(&self) -> Result<(), CarbotaxError> {
        match &self.interrupt {
            Some(interrupt) => interrupt.check(),
            None => Ok(()),
        }
    }
}

/// Virtual clock: `sleep` advances time instantly and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned lock only means a test panicked mid-update; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_records_sleeps() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
        assert_eq!(clock.now() - start, Duration::from_millis(1250));
    }

    #[test]
    fn interrupted_system_clock_returns_at_once() {
        let interrupt = Interrupt::new();
        let clock = SystemClock::interruptible(interrupt.clone());
        assert!(clock.check_interrupt().is_ok());

        interrupt.trigger();
        let start = Instant::now();
        clock.sleep(Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(clock.check_interrupt(), Err(CarbotaxError::Interrupted)));
    }

    #[test]
    fn trigger_wakes_a_sleeping_clock() {
        let interrupt = Interrupt::new();
        let clock = SystemClock::interruptible(interrupt.clone());
        let trigger = interrupt.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });

        let start = Instant::now();
        clock.sleep(Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
