use std::time::Duration;

use lockwarden_core::{AppError, AppResult};
use rand::Rng;

/// Fixed allowance added to the drift margin for node-side expiry precision.
const CLOCK_PRECISION_MARGIN: Duration = Duration::from_millis(2);

/// Tuning parameters of the distributed lock client.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfiguration {
    /// Fraction of the TTL reserved to compensate for clock drift between nodes.
    pub drift_factor: f64,
    /// Additional acquisition attempts after a contended first attempt.
    pub retry_count: u32,
    /// Base pause between acquisition attempts.
    pub retry_delay: Duration,
    /// Upper bound of the random pause added to `retry_delay`.
    pub retry_jitter: Duration,
    /// Remaining validity below which a held lock is extended.
    pub automatic_extension_threshold: Duration,
    /// TTL used by request guards unless overridden.
    pub default_ttl: Duration,
}

impl Default for LockConfiguration {
    fn default() -> Self {
        Self {
            drift_factor: 0.01,
            retry_count: 0,
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(200),
            automatic_extension_threshold: Duration::from_millis(500),
            default_ttl: Duration::from_secs(20),
        }
    }
}

impl LockConfiguration {
    /// Checks the parameters for internal consistency.
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..1.0).contains(&self.drift_factor) {
            return Err(AppError::Validation(format!(
                "lock drift factor must be in [0, 1), got {}",
                self.drift_factor
            )));
        }

        if self.default_ttl.is_zero() {
            return Err(AppError::Validation(
                "lock default ttl must be greater than zero".to_owned(),
            ));
        }

        if self.automatic_extension_threshold >= self.default_ttl {
            return Err(AppError::Validation(format!(
                "lock automatic extension threshold ({} ms) must be below the default ttl ({} ms)",
                self.automatic_extension_threshold.as_millis(),
                self.default_ttl.as_millis()
            )));
        }

        Ok(())
    }

    /// Margin subtracted from a TTL to account for clock drift.
    #[must_use]
    pub fn drift_for(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.drift_factor) + CLOCK_PRECISION_MARGIN
    }

    /// Pause before the next acquisition attempt.
    #[must_use]
    pub fn retry_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.retry_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.retry_delay;
        }

        let jitter = rand::rng().random_range(0..=jitter_ms);
        self.retry_delay + Duration::from_millis(jitter)
    }
}
