use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Token issued by a successful login. Replaced as a whole, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub generation: u64,
}

impl Session {
    pub(crate) fn new(token: String, generation: u64) -> Self {
        Self {
            token,
            issued_at: Utc::now(),
            generation,
        }
    }
}

/// Delays applied around a re-login.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Pause between a fresh login and the retried request.
    pub settle: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

impl Backoff {
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`. Attempt 0 waits nothing.
pub fn calculate_delay(attempt: u32, backoff: &Backoff) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    backoff
        .base
        .checked_mul(factor)
        .unwrap_or(backoff.max)
        .min(backoff.max)
}

#[derive(Debug, Default)]
pub(crate) struct RetryState {
    attempts: AtomicU32,
}

impl RetryState {
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}
