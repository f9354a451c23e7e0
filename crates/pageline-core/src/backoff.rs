//! Backoff policy: (failure class, attempt) -> wait duration

use std::time::Duration;

use rand::Rng;

use crate::error::FailureClass;
use crate::pacing::jitter;

/// Classified backoff.
///
/// - rate-limited / connection: `base * 2^(attempt-1)` + jitter
/// - server error: `base * attempt` + smaller jitter
/// - timeout: `base * attempt`, no jitter
/// - unexpected: `base`
///
/// Jitter bounds only desynchronize repeated callers; tune freely.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub rate_limit_jitter: Duration,
    pub connection_jitter: Duration,
    pub server_error_jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            rate_limit_jitter: Duration::from_secs(3),
            connection_jitter: Duration::from_secs(5),
            server_error_jitter: Duration::from_secs(2),
        }
    }

    /// Same policy with all jitter disabled
    pub fn without_jitter(base: Duration) -> Self {
        Self {
            base,
            rate_limit_jitter: Duration::ZERO,
            connection_jitter: Duration::ZERO,
            server_error_jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the wait. `attempt` is 1-based; 0 counts as 1.
    pub fn base_wait(&self, class: FailureClass, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match class {
            FailureClass::RateLimited | FailureClass::Connection => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base.saturating_mul(factor)
            }
            FailureClass::ServerError | FailureClass::Timeout => self.base.saturating_mul(attempt),
            FailureClass::Unexpected => self.base,
        }
    }

    /// Upper bound of the random slack added for `class`
    pub fn max_jitter(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::RateLimited => self.rate_limit_jitter,
            FailureClass::Connection => self.connection_jitter,
            FailureClass::ServerError => self.server_error_jitter,
            FailureClass::Timeout | FailureClass::Unexpected => Duration::ZERO,
        }
    }

    /// Full wait before retrying after the `attempt`-th failure.
    pub fn wait(&self, class: FailureClass, attempt: u32, rng: &mut impl Rng) -> Duration {
        self.base_wait(class, attempt)
            .saturating_add(jitter(self.max_jitter(class), rng))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
