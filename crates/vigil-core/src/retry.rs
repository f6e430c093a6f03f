//! Backoff calculation for retrying loops.
//!
//! Only the math lives here; the pollers in `vigil-server` supply the
//! randomness and do the sleeping.

use std::time::Duration;

/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max: Duration,
    /// Jitter range as a fraction of the delay.
    pub jitter_factor: f64,
}

impl Backoff {
    /// Backoff with the default jitter factor.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Delay for the zero-based `attempt`, with `random` in `[0.0, 1.0)`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay(&self, attempt: u32, random: f64) -> Duration {
        let ms = calculate_backoff_delay_with_random(
            attempt,
            self.base.as_millis() as u64,
            self.max.as_millis() as u64,
            self.jitter_factor,
            random,
        );
        Duration::from_millis(ms)
    }
}

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`,
/// so a jitter factor of 0.2 varies the delay by ±20%.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_random_has_no_jitter() {
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 30_000, 0.2, 0.5), 1000);
        assert_eq!(calculate_backoff_delay_with_random(3, 1000, 30_000, 0.2, 0.5), 8000);
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(calculate_backoff_delay_with_random(10, 1000, 30_000, 0.0, 0.9), 30_000);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(
            calculate_backoff_delay_with_random(u32::MAX, 1000, 30_000, 0.0, 0.0),
            30_000
        );
    }

    #[test]
    fn jitter_stays_in_range() {
        for r in [0.0, 0.25, 0.5, 0.75, 0.999] {
            let d = calculate_backoff_delay_with_random(2, 1000, 30_000, 0.2, r);
            assert!((3200..=4800).contains(&d), "delay {d} out of range for r={r}");
        }
    }

    #[test]
    fn backoff_struct_uses_durations() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(4));
        assert_eq!(backoff.delay(0, 0.5), Duration::from_millis(500));
        assert_eq!(backoff.delay(1, 0.5), Duration::from_secs(1));
        assert_eq!(backoff.delay(6, 0.5), Duration::from_secs(4));
    }
}
