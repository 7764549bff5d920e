use std::thread;
use std::time::Duration;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// Bounded exponential backoff: `min(base * 2^attempt, max)` with a
/// symmetric jitter fraction applied on top.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("retry.jitter {} outside [0, 1]", self.jitter));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("retry.base_delay_ms exceeds max_delay_ms".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let capped = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        if self.jitter <= 0.0 || capped == 0 {
            return Duration::from_millis(capped);
        }
        let spread = self.jitter.min(1.0);
        let scale = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        Duration::from_millis((capped as f64 * scale).round() as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. The last error is returned as-is.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{what} failed (attempt {}/{attempts}): {err}; retrying in {delay:?}",
                        attempt + 1
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`RetryPolicy::run`], but an exhausted transient failure becomes
    /// [`WalletError::DeliveryTimeout`].
    pub fn deliver<T>(&self, what: &str, op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        self.run(what, op).map_err(|err| {
            if err.is_retryable() {
                WalletError::DeliveryTimeout {
                    attempts,
                    reason: err.to_string(),
                }
            } else {
                err
            }
        })
    }
}
