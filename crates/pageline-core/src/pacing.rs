//! Suspension between requests, retries, items and groups
//!
//! All waiting goes through [`Sleeper`] so the fetch loop can be driven
//! without real time in tests.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::shutdown::is_shutdown_requested;

/// Slice length for interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Something that can suspend the current thread of control.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Real sleeper: blocks the thread, waking early once shutdown is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        let mut left = duration;
        while !left.is_zero() {
            if is_shutdown_requested() {
                return;
            }
            let slice = left.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            left -= slice;
        }
    }
}

/// Records requested suspensions instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration passed to `sleep`, in call order
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Sum of all requested suspensions
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}

/// Uniform random duration in `[0, max]`; zero when `max` is zero.
pub fn jitter(max: Duration, rng: &mut impl Rng) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rng.random_range(0.0..=max.as_secs_f64()))
}

/// `base` plus up to `max_jitter` of random slack.
pub fn jittered(base: Duration, max_jitter: Duration, rng: &mut impl Rng) -> Duration {
    base.saturating_add(jitter(max_jitter, rng))
}
