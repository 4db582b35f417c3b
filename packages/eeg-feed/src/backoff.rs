// Exponential backoff with jitter
//
// Delay n is `base * factor^n`, minus a random fraction (up to `jitter`) of
// itself, clamped to `cap`. For any config accepted by
// `BackoffConfig::validate` (`factor * (1 - jitter) > 1`) the jittered delays
// grow strictly until they reach the cap, then stay there.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over from the base delay (call after a successful connect)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let cap = self.config.cap.as_secs_f64();
        let raw = self.config.base.as_secs_f64() * self.config.factor.powi(self.attempt.min(64) as i32);
        self.attempt = self.attempt.saturating_add(1);

        if raw >= cap {
            return self.config.cap;
        }

        let shave = if self.config.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..self.config.jitter)
        } else {
            0.0
        };

        Duration::from_secs_f64((raw * (1.0 - shave)).min(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            jitter,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_deterministic_schedule_without_jitter() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn test_jittered_delays_increase_until_cap() {
        for _ in 0..200 {
            let mut backoff = Backoff::new(BackoffConfig::default());
            let cap = BackoffConfig::default().cap;
            let mut previous = Duration::ZERO;
            let mut reached_cap = false;

            for _ in 0..20 {
                let delay = backoff.next_delay();
                assert!(delay <= cap, "delay {:?} exceeds cap", delay);
                if reached_cap {
                    assert_eq!(delay, cap);
                } else {
                    assert!(delay > previous, "{:?} is not greater than {:?}", delay, previous);
                }
                reached_cap = delay == cap;
                previous = delay;
            }
            assert!(reached_cap);
        }
    }

    proptest! {
        #[test]
        fn prop_valid_configs_grow_until_cap(
            factor in 1.1f64..4.0,
            jitter in 0.0f64..0.9,
            base_ms in 1u64..1000,
            cap_factor in 2u64..100,
        ) {
            let config = BackoffConfig {
                base: Duration::from_millis(base_ms),
                factor,
                cap: Duration::from_millis(base_ms * cap_factor),
                jitter,
            };
            prop_assume!(config.validate().is_ok());

            let mut backoff = Backoff::new(config.clone());
            let mut previous = Duration::ZERO;
            for _ in 0..200 {
                let delay = backoff.next_delay();
                prop_assert!(delay <= config.cap);
                if previous == config.cap {
                    prop_assert_eq!(delay, config.cap);
                } else {
                    prop_assert!(delay > previous, "{:?} after {:?}", delay, previous);
                }
                previous = delay;
            }
            prop_assert_eq!(previous, config.cap);
        }
    }

    #[test]
    fn test_reset_restarts_from_base() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
