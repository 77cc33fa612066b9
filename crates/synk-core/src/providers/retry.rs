//! Exponential backoff shared by every adapter and by the apply phase.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::storage::{HttpConfig, SyncSettings};

/// `max_attempts` counts the first try, so 5 means one call plus four retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    /// Fractional spread applied to each delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
    /// Upper bound on any single wait, including server `Retry-After` hints.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_attempts: 5,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(http: &HttpConfig) -> Self {
        Self {
            base: Duration::from_millis(http.retry_base_ms),
            factor: http.retry_factor.max(1),
            max_attempts: http.retry_max_attempts.max(1),
            jitter: http.retry_jitter.clamp(0.0, 0.99),
            max_delay: Duration::from_secs(http.retry_max_delay_secs.max(1)),
        }
    }

    /// Policy for re-running a failed Create/Update/Delete.
    pub fn for_apply(sync: &SyncSettings) -> Self {
        Self {
            base: Duration::from_millis(sync.apply_retry_base_ms),
            factor: 2,
            max_attempts: sync.apply_max_retries + 1,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay before retry number `retry` (1-based) without jitter.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base.saturating_mul(self.factor.saturating_pow(exp))
    }

    /// Jittered delay, never shorter than a server-provided `Retry-After`
    /// and never longer than `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let nominal = self.nominal_delay(retry);
        let jittered = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            nominal.mul_f64(1.0 + spread)
        } else {
            nominal
        };
        let wait = match retry_after {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        };
        wait.min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (when - now).to_std().ok()
}
