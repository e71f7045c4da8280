//! Bounded retry with exponential backoff and jitter.

use crate::error::CompletionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random component added to each delay.
    pub max_jitter: Duration,
    /// Fixed jitter seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
            max_jitter: Duration::from_millis(200),
            seed: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The finite sequence of waits between attempts: `max_attempts - 1` delays,
    /// `base * 2^i + jitter`, never shorter than the previous one.
    pub fn delays(&self) -> Backoff {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Backoff {
            base: self.base_delay,
            max_jitter: self.max_jitter,
            remaining: self.max_attempts.max(1) - 1,
            step: 0,
            last: Duration::ZERO,
            rng,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    /// The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CompletionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let mut delays = self.delays();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "⚠️ {} attempt {}/{} failed ({}); retrying in {:?}",
                            label,
                            attempt,
                            self.max_attempts,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}

/// Iterator over backoff delays. Restartable by calling [`RetryPolicy::delays`] again.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max_jitter: Duration,
    remaining: u32,
    step: u32,
    last: Duration,
    rng: StdRng,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let exp = self.base.saturating_mul(1u32 << self.step.min(20));
        self.step += 1;
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
        };
        let delay = (exp + jitter).max(self.last);
        self.last = delay;
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}
