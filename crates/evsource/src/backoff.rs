// Backoff — randomized exponential retry schedule.

use std::time::{Duration, Instant};

use rand::Rng;

/// Tunable knobs for the retry schedule, copied from the client into each
/// connection.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Growth factor applied to the interval after each wait (default: 1.5).
    pub multiplier: f64,
    /// Upper bound for the undelayed interval (default: 60s).
    pub max_interval: Duration,
    /// Jitter band: each wait is `interval × (1 ± factor)` (default: 0.5).
    pub randomization_factor: f64,
    /// Give up once this much time passed since the current run of
    /// failures began. `None` disables the bound.
    pub max_elapsed: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.5,
            max_elapsed: None,
        }
    }
}

/// Retry schedule state for one logical connection.
///
/// The base interval is supplied per call because the server may replace
/// the reconnection time mid-stream via a `retry:` field. A reset (on every
/// successfully validated connection) makes the next wait start from the
/// base again.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    /// Undelayed interval for the next wait; `None` right after a reset.
    next: Option<Duration>,
    /// When the current run of failures started.
    since: Option<Instant>,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            next: None,
            since: None,
        }
    }

    /// The jittered wait before the next attempt, advancing the schedule.
    pub(crate) fn next_delay(&mut self, base: Duration) -> Duration {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
        let current = self.next.unwrap_or(base);
        self.next = Some(
            current
                .mul_f64(self.config.multiplier)
                .min(self.config.max_interval),
        );
        jitter(current, self.config.randomization_factor)
    }

    /// Back to the initial interval. Called on every successful connection.
    pub(crate) fn reset(&mut self) {
        self.next = None;
        self.since = None;
    }

    /// Whether the optional max-elapsed bound has been exceeded.
    pub(crate) fn give_up(&self) -> bool {
        match (self.config.max_elapsed, self.since) {
            (Some(max), Some(since)) => since.elapsed() > max,
            _ => false,
        }
    }
}

fn jitter(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }
    let spread = rand::thread_rng().gen_range(1.0 - factor..=1.0 + factor);
    interval.mul_f64(spread)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unjittered() -> BackoffConfig {
        BackoffConfig {
            randomization_factor: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn first_delay_uses_base() {
        let mut backoff = Backoff::new(unjittered());
        assert_eq!(
            backoff.next_delay(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn grows_by_multiplier() {
        let mut backoff = Backoff::new(unjittered());
        let base = Duration::from_millis(100);
        assert_eq!(backoff.next_delay(base), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(base), Duration::from_millis(150));
        assert_eq!(backoff.next_delay(base), Duration::from_millis(225));
    }

    #[test]
    fn capped_at_max_interval() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_interval: Duration::from_millis(120),
            ..unjittered()
        });
        let base = Duration::from_millis(100);
        backoff.next_delay(base);
        assert_eq!(backoff.next_delay(base), Duration::from_millis(120));
        assert_eq!(backoff.next_delay(base), Duration::from_millis(120));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut backoff = Backoff::new(unjittered());
        let base = Duration::from_millis(100);
        backoff.next_delay(base);
        backoff.next_delay(base);
        backoff.reset();
        assert_eq!(backoff.next_delay(base), Duration::from_millis(100));
    }

    #[test]
    fn base_change_applies_after_reset() {
        let mut backoff = Backoff::new(unjittered());
        backoff.next_delay(Duration::from_millis(100));
        backoff.reset();
        // A server-updated reconnection time takes over as the new base.
        assert_eq!(
            backoff.next_delay(Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            backoff.reset();
            let delay = backoff.next_delay(base);
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay <= Duration::from_millis(1500), "{delay:?}");
        }
    }

    #[test]
    fn give_up_only_with_bound_and_elapsed() {
        let mut unbounded = Backoff::new(unjittered());
        unbounded.next_delay(Duration::from_millis(1));
        assert!(!unbounded.give_up());

        let mut bounded = Backoff::new(BackoffConfig {
            max_elapsed: Some(Duration::ZERO),
            ..unjittered()
        });
        assert!(!bounded.give_up()); // nothing attempted yet
        bounded.next_delay(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(bounded.give_up());
    }
}
