//! Bounded cooperative polling
//!
//! Shared memory gives no wake-ups, so both sides observe each other by
//! re-reading fields at a fixed interval. Every poll is bounded by a deadline
//! and by a stop condition (shutdown, or the game no longer running).

use std::time::{Duration, Instant};

/// How a poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition held
    Ready,
    /// The deadline passed first
    TimedOut,
    /// The stop condition fired first
    Stopped,
}

impl PollOutcome {
    pub fn is_ready(self) -> bool {
        self == PollOutcome::Ready
    }
}

/// Interval and deadline of one polling wait
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    deadline: Instant,
}

impl Poller {
    /// Poll every `interval` for at most `timeout` from now
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + timeout,
        }
    }

    /// Poll every `interval` until a fixed `deadline`
    pub fn until(interval: Duration, deadline: Instant) -> Self {
        Self { interval, deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleep one interval, cut short at the deadline
    pub async fn tick(&self) {
        tokio::time::sleep(self.interval.min(self.remaining())).await;
    }

    /// Re-evaluate `ready` each interval until it holds, `stop` holds, or the deadline passes
    ///
    /// `stop` is checked before `ready` so that nothing is acted on after a stop.
    pub async fn wait<S, R>(&self, mut stop: S, mut ready: R) -> PollOutcome
    where
        S: FnMut() -> bool,
        R: FnMut() -> bool,
    {
        loop {
            if stop() {
                return PollOutcome::Stopped;
            }
            if ready() {
                return PollOutcome::Ready;
            }
            if self.expired() {
                return PollOutcome::TimedOut;
            }
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[tokio::test]
    async fn test_ready_immediately() {
        let poller = Poller::new(Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(poller.wait(|| false, || true).await, PollOutcome::Ready);
    }

    #[tokio::test]
    async fn test_times_out() {
        let started = Instant::now();
        let poller = Poller::new(Duration::from_millis(5), Duration::from_millis(30));
        assert_eq!(poller.wait(|| false, || false).await, PollOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_stop_wins_over_ready() {
        let poller = Poller::new(Duration::from_millis(5), Duration::from_secs(1));
        assert_eq!(poller.wait(|| true, || true).await, PollOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_observes_concurrent_change() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
        };

        let polls = AtomicU32::new(0);
        let poller = Poller::new(Duration::from_millis(2), Duration::from_secs(2));
        let outcome = poller
            .wait(
                || false,
                || {
                    polls.fetch_add(1, Ordering::Relaxed);
                    flag.load(Ordering::SeqCst)
                },
            )
            .await;

        setter.await.unwrap();
        assert!(outcome.is_ready());
        assert!(polls.load(Ordering::Relaxed) > 1);
    }
}
