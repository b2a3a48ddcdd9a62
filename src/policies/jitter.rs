use std::time::Duration;

use rand::Rng;

/// Randomization applied on top of a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as is.
    #[default]
    None,
    /// Uniform in `[0, delay]`. Spreads reconnect storms the most.
    Full,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
        }
    }
}
