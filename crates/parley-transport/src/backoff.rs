//! Exponential backoff for reconnect attempts.

use std::time::Duration;

use rand::Rng;

/// How a client link retries after a transient failure.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`, capped at
/// `max_delay`, then scaled by a random factor in
/// `[1 - jitter, 1 + jitter]` so a crowd of clients dropped by the same
/// server restart does not reconnect in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
    /// Number of retries after the first failed attempt. 0 disables
    /// reconnection entirely.
    pub max_retries: u32,
    /// Jitter fraction, clamped to `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 8,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The un-jittered delay before retry `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Applies this policy's jitter to `delay`. A non-finite jitter
    /// counts as none.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }

    /// Starts a fresh retry sequence.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            retries: 0,
        }
    }
}

/// One retry sequence driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    retries: u32,
}

impl Backoff {
    /// Returns the delay to wait before the next retry, or `None` once
    /// the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.jittered(self.policy.delay_for(self.retries));
        self.retries += 1;
        Some(delay)
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}
