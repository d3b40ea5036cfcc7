//! Retry interval strategies.
//!
//! A [`BackoffStrategy`] is a small state machine generating the wait
//! intervals between retries of one logical operation. Strategies are
//! stateful, so [`BackoffPolicy`] hands out a fresh instance per call --
//! concurrent operations must never share a retry cursor.

use std::time::Duration;

/// Stateful generator of retry intervals.
pub trait BackoffStrategy: Send {
    /// Returns the current interval without advancing, or `None` if the
    /// strategy is exhausted (fail-fast).
    fn get(&self) -> Option<Duration>;

    /// Advances to and returns the next interval, or `None` if exhausted.
    fn next(&mut self) -> Option<Duration>;

    /// Whether another interval is available.
    fn has_next(&self) -> bool;
}

/// Adds a fixed delta per step, clamped at `max`.
///
/// At `max`, the next step either loops back to `initial` (when `loop`)
/// or stays at `max` forever.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    current: Duration,
    initial: Duration,
    delta: Duration,
    max: Duration,
    looping: bool,
}

impl ConstantBackoff {
    pub fn new(initial: Duration, delta: Duration, max: Duration, looping: bool) -> Self {
        Self {
            current: initial,
            initial,
            delta,
            max,
            looping,
        }
    }
}

impl BackoffStrategy for ConstantBackoff {
    fn get(&self) -> Option<Duration> {
        Some(self.current)
    }

    fn next(&mut self) -> Option<Duration> {
        self.current = if self.current >= self.max {
            if self.looping {
                self.initial
            } else {
                self.max
            }
        } else {
            (self.current + self.delta).min(self.max)
        };
        Some(self.current)
    }

    fn has_next(&self) -> bool {
        true
    }
}

/// Doubles per step, clamped at `max`; same loop behavior as [`ConstantBackoff`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    looping: bool,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, looping: bool) -> Self {
        Self {
            current: initial,
            initial,
            max,
            looping,
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn get(&self) -> Option<Duration> {
        Some(self.current)
    }

    fn next(&mut self) -> Option<Duration> {
        self.current = if self.current >= self.max {
            if self.looping {
                self.initial
            } else {
                self.max
            }
        } else {
            (self.current * 2).min(self.max)
        };
        Some(self.current)
    }

    fn has_next(&self) -> bool {
        true
    }
}

/// Never retries: `has_next()` is false, `get()`/`next()` return `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastBackoff;

impl BackoffStrategy for FailFastBackoff {
    fn get(&self) -> Option<Duration> {
        None
    }

    fn next(&mut self) -> Option<Duration> {
        None
    }

    fn has_next(&self) -> bool {
        false
    }
}

/// Backoff configuration; the factory for per-operation strategies.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    Constant {
        initial: Duration,
        delta: Duration,
        max: Duration,
        looping: bool,
    },
    Exponential {
        initial: Duration,
        max: Duration,
        looping: bool,
    },
    FailFast,
}

impl BackoffPolicy {
    /// Returns a new strategy instance with a fresh cursor.
    pub fn strategy(&self) -> Box<dyn BackoffStrategy> {
        match *self {
            BackoffPolicy::Constant {
                initial,
                delta,
                max,
                looping,
            } => Box::new(ConstantBackoff::new(initial, delta, max, looping)),
            BackoffPolicy::Exponential {
                initial,
                max,
                looping,
            } => Box::new(ExponentialBackoff::new(initial, max, looping)),
            BackoffPolicy::FailFast => Box::new(FailFastBackoff),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            looping: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(strategy: &mut dyn BackoffStrategy, n: usize) -> Vec<u128> {
        (0..n)
            .map(|_| strategy.next().map(|d| d.as_millis()).unwrap_or(u128::MAX))
            .collect()
    }

    #[test]
    fn constant_loops_back_to_initial() {
        let mut s = ConstantBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(500),
            Duration::from_millis(3000),
            true,
        );
        assert_eq!(millis(&mut s, 6), vec![1500, 2000, 2500, 3000, 1000, 1500]);
    }

    #[test]
    fn constant_clamps_without_loop() {
        let mut s = ConstantBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(500),
            Duration::from_millis(2000),
            false,
        );
        assert_eq!(millis(&mut s, 4), vec![1500, 2000, 2000, 2000]);
    }

    #[test]
    fn exponential_doubles_then_resets() {
        let mut s = ExponentialBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(30000),
            true,
        );
        assert_eq!(
            millis(&mut s, 7),
            vec![2000, 4000, 8000, 16000, 30000, 1000, 2000]
        );
    }

    #[test]
    fn exponential_clamps_without_loop() {
        let mut s = ExponentialBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(3000),
            false,
        );
        assert_eq!(millis(&mut s, 4), vec![2000, 3000, 3000, 3000]);
    }

    #[test]
    fn get_does_not_advance() {
        let s = ConstantBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_millis(500),
            false,
        );
        assert_eq!(s.get(), Some(Duration::from_millis(100)));
        assert_eq!(s.get(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn fail_fast_never_retries() {
        let mut s = FailFastBackoff;
        assert!(!s.has_next());
        assert_eq!(s.get(), None);
        assert_eq!(s.next(), None);
    }

    #[test]
    fn policy_hands_out_fresh_cursors() {
        let policy = BackoffPolicy::Constant {
            initial: Duration::from_millis(100),
            delta: Duration::from_millis(100),
            max: Duration::from_millis(300),
            looping: false,
        };
        let mut a = policy.strategy();
        a.next();
        a.next();
        let b = policy.strategy();
        assert_eq!(b.get(), Some(Duration::from_millis(100)));
        assert_eq!(a.get(), Some(Duration::from_millis(300)));
    }
}
