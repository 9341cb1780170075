//! Capped exponential backoff for polling asynchronous backend work.

use std::time::Duration;

/// Delay schedule: `initial`, then multiplied by `factor` each step, never
/// exceeding `cap` after the first step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// First delay.
    pub initial: Duration,
    /// Growth factor applied after every delay.
    pub factor: f64,
    /// Largest delay after the first.
    pub cap: Duration,
}

impl Backoff {
    /// Create a schedule.
    pub const fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        Self {
            initial,
            factor,
            cap,
        }
    }

    /// Schedule used while waiting on app installs and deletes: 1s, 2s, 4s,
    /// then 5s.
    pub const fn app_sync() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(5))
    }

    /// Endless iterator over the delays.
    pub fn delays(&self) -> Delays {
        Delays {
            next: self.initial,
            factor: self.factor,
            cap: self.cap,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::app_sync()
    }
}

/// Iterator returned by [`Backoff::delays`].
#[derive(Debug, Clone)]
pub struct Delays {
    next: Duration,
    factor: f64,
    cap: Duration,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap);
        Some(current)
    }
}
