//! Time source used by every wait and poll loop.
//!
//! Loops never call `tokio::time` directly; they take a [`Clock`] so tests can
//! drive them deterministically (with `#[tokio::test(start_paused = true)]` the
//! production [`TokioClock`] is already virtual).

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Wall-clock time via `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Fixed-period deadline generator.
///
/// Unlike `tokio::time::Interval` it owns no timer; callers sleep until
/// [`Ticker::deadline`] on whatever clock they hold, then call [`Ticker::advance`].
#[derive(Debug, Clone)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// First tick fires one `period` after `start`.
    pub fn new(start: Instant, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            next: start + period,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Move to the first deadline strictly after `now`, skipping missed ticks.
    pub fn advance(&mut self, now: Instant) {
        while self.next <= now {
            self.next += self.period;
        }
    }
}
