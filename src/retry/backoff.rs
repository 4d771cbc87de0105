use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay policy applied between two attempts of a remote call.
///
/// The delay starts from `base_delay_ms`, is optionally spread around that
/// base (jitter), then grows exponentially with the backoff level. The level
/// only moves on rate-limit errors, so sustained throttling slows callers down
/// while isolated timeouts keep retrying at the base pace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds between retries.
    pub base_delay_ms: u64,
    /// Spread the delay randomly around the base delay.
    pub jitter: bool,
    /// Jitter spread as a fraction of the base delay (`0.0..=1.0`).
    pub spread_factor: f64,
    /// Multiply the delay by `base ^ backoff_level`.
    pub enabled: bool,
    /// Base of the exponential growth.
    pub base: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            jitter: true,
            spread_factor: 0.5,
            enabled: true,
            base: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// A policy that never waits. Handy for tests and offline runs.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            jitter: false,
            ..Default::default()
        }
    }

    /// Compute the delay for `backoff_level` given a jitter sample in `[0, 1)`.
    ///
    /// `delay = (base + spread * unit - spread / 2) * base_exp ^ level`,
    /// with `spread = base * spread_factor`. Negative results clamp to zero
    /// and overflowing results saturate to [`Duration::MAX`].
    pub fn delay(&self, backoff_level: u32, jitter_unit: f64) -> Duration {
        let base = self.base_delay_ms as f64 / 1000.0;
        let mut secs = base;

        if self.jitter {
            let spread = base * self.spread_factor;
            secs += spread * jitter_unit - spread / 2.0;
        }

        if self.enabled {
            let level = i32::try_from(backoff_level).unwrap_or(i32::MAX);
            secs *= self.base.powi(level);
        }

        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Compute the delay for `backoff_level` with a fresh random jitter sample.
    pub fn sample(&self, backoff_level: u32) -> Duration {
        self.delay(backoff_level, rand::random::<f64>())
    }
}
