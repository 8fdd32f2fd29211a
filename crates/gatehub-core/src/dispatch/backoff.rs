//! Poll cadence and timeout budgets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between poll ticks, bounded by a maximum interval.
///
/// Fast jobs are detected promptly by the short initial delay; long jobs
/// settle at `max_delay` so the remote side is not hammered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollBackoff {
    /// Delay before the first poll tick.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Multiplier applied per tick (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on the delay between ticks.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

const fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

impl PollBackoff {
    /// Calculate the delay before poll tick `attempt` (1-based).
    ///
    /// Multipliers below 1.0 (including non-finite ones) are clamped to
    /// 1.0; configuration validation rejects them before a coordinator
    /// ever sees them, but the calculation itself must never panic.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.multiplier.max(1.0);
        #[allow(clippy::cast_possible_wrap)] // attempt count won't exceed i32
        let delay_secs =
            self.initial_delay.as_secs_f64() * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));
        delay.min(self.max_delay)
    }
}

/// Per-unit dispatch budgets: total timeout plus poll backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSettings {
    /// Cumulative budget from trigger acknowledgment to a terminal remote
    /// status. Exceeding it marks the run `timed_out` even though the
    /// remote side may still be executing.
    #[serde(default = "default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Poll cadence between ticks.
    #[serde(default)]
    pub backoff: PollBackoff,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            backoff: PollBackoff::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let backoff = PollBackoff {
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn hostile_multipliers_never_panic_the_delay_calculation() {
        for multiplier in [-2.0, 0.0, 0.5, f64::NAN, f64::INFINITY] {
            let backoff = PollBackoff {
                initial_delay: Duration::from_secs(2),
                multiplier,
                max_delay: Duration::from_secs(10),
            };
            let delay = backoff.delay_for_attempt(2);
            assert!(delay >= backoff.initial_delay, "multiplier {multiplier}");
            assert!(delay <= backoff.max_delay, "multiplier {multiplier}");
        }
    }

    #[test]
    fn attempt_zero_is_clamped_to_first() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay_for_attempt(0), backoff.delay_for_attempt(1));
    }

    #[test]
    fn settings_parse_from_toml_with_defaults() {
        let settings: DispatchSettings = toml::from_str("timeout = \"5m\"").unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert_eq!(settings.backoff, PollBackoff::default());
    }
}
