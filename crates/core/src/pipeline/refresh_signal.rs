use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

/// Host display-refresh callback, as an awaitable tick.
#[async_trait]
pub trait RefreshSignal: Send {
    /// Resolves at the next refresh.
    async fn next_refresh(&mut self);
}

/// Fixed-rate refresh driven by a tokio interval.
///
/// Missed ticks are skipped: a slow cycle waits for the next refresh
/// rather than bursting through the backlog.
pub struct IntervalRefresh {
    interval: Interval,
}

impl IntervalRefresh {
    pub fn new(hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / hz.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl RefreshSignal for IntervalRefresh {
    async fn next_refresh(&mut self) {
        self.interval.tick().await;
    }
}

/// Refresh that is always due. For headless runs and tests.
#[derive(Default)]
pub struct ImmediateRefresh;

#[async_trait]
impl RefreshSignal for ImmediateRefresh {
    async fn next_refresh(&mut self) {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[tokio::test]
    async fn test_interval_period_matches_rate() {
        let refresh = IntervalRefresh::new(60);
        assert_relative_eq!(refresh.period().as_secs_f64(), 1.0 / 60.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_zero_rate_is_clamped() {
        let refresh = IntervalRefresh::new(0);
        assert_eq!(refresh.period(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_on_period() {
        let mut refresh = IntervalRefresh::new(10);
        let start = tokio::time::Instant::now();
        refresh.next_refresh().await; // first tick is immediate
        refresh.next_refresh().await;
        refresh.next_refresh().await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_immediate_refresh_resolves() {
        let mut refresh = ImmediateRefresh;
        refresh.next_refresh().await;
    }
}
