//! Exponential backoff.
//!
//! The delay for attempt `n` (0-indexed) is `base × factor^n`, capped at
//! `max`, then jittered. The base for each attempt is derived from the
//! attempt number alone, so jitter never feeds back into later delays.
//!
//! ```rust
//! use std::time::Duration;
//! use queuebus::policies::Backoff;
//!
//! let retry = Backoff::terminal_retry(Duration::from_secs(2));
//! assert_eq!(retry.delay(0), Duration::from_secs(2));
//! assert_eq!(retry.delay(1), Duration::from_secs(4));
//! assert_eq!(retry.delay(2), Duration::from_secs(8));
//! ```

use std::time::Duration;

use super::jitter::Jitter;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: Jitter,
}

impl Backoff {
    /// Transport reconnect schedule: doubling from `base`, capped at `max`,
    /// full jitter.
    pub fn reconnect(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2.0,
            jitter: Jitter::Full,
        }
    }

    /// Terminal-event publish retries: `base`, `2×base`, `4×base`, ... with
    /// no jitter. Capped at `4×base` so three retries read 2s/4s/8s for a 2s base.
    pub fn terminal_retry(base: Duration) -> Self {
        Self {
            base,
            max: base.saturating_mul(4),
            factor: 2.0,
            jitter: Jitter::None,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);

        let capped = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        self.jitter.apply(capped)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::reconnect(Duration::from_secs(1), Duration::from_secs(30))
    }
}
