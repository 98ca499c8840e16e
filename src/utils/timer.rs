//! Stop-aware pausing utility implemented using `tokio::time::Sleep`, plus
//! the wall-clock source used by the background workers.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::{self, Duration, Instant, Sleep};

/// Wall-clock time source in unix seconds. Injected into workers so that
/// interval and rate-limit logic can be driven deterministically.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the unix epoch.
    fn now(&self) -> u64;
}

/// Clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by given number of seconds.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Pausing utility for waiting out a loop interval while staying responsive
/// to a stop signal carried by a `watch` channel.
///
/// Must be used within the context of a tokio runtime.
#[derive(Debug)]
pub struct Timer {
    /// Inner `tokio::time::Sleep` future, wrapped in a pinned box to support
    /// resetting and awaiting multiple times.
    sleep: Pin<Box<Sleep>>,

    /// Duration used by the last kick-off.
    last_dur: Duration,
}

impl Timer {
    /// Creates a new timer that immediately times-out.
    pub fn new() -> Self {
        Timer {
            sleep: Box::pin(time::sleep(Duration::ZERO)),
            last_dur: Duration::ZERO,
        }
    }

    /// Get the last pause duration used.
    pub fn get_dur(&self) -> Duration {
        self.last_dur
    }

    /// Kicks off the timer with the given duration.
    pub fn kickoff(&mut self, dur: Duration) {
        self.last_dur = dur;
        self.sleep.as_mut().reset(Instant::now() + dur);
    }

    /// Waits for the timer to time out.
    pub async fn timeout(&mut self) {
        self.sleep.as_mut().await
    }

    /// Pauses for given duration unless a stop is signalled through
    /// `rx_stop` first. Returns true if the full duration elapsed, false if
    /// stop was requested (or the stop sender is gone).
    pub async fn pause(
        &mut self,
        dur: Duration,
        rx_stop: &mut watch::Receiver<bool>,
    ) -> bool {
        let stopped = *rx_stop.borrow();
        if stopped {
            return false;
        }
        self.kickoff(dur);
        loop {
            tokio::select! {
                _ = self.sleep.as_mut() => return true,
                changed = rx_stop.changed() => {
                    let stopped = changed.is_err() || *rx_stop.borrow();
                    if stopped {
                        return false;
                    }
                }
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod timer_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timer_initial() {
        let start = Instant::now();
        let mut timer = Timer::new();
        timer.timeout().await; // should complete immediately
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(timer.get_dur().is_zero());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_full() {
        let (_tx_stop, mut rx_stop) = watch::channel(false);
        let mut timer = Timer::new();
        let start = Instant::now();
        assert!(timer.pause(Duration::from_millis(100), &mut rx_stop).await);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(timer.get_dur(), Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_interrupted() {
        let (tx_stop, mut rx_stop) = watch::channel(false);
        let mut timer = Timer::new();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            let _ = tx_stop.send(true);
        });
        let start = Instant::now();
        assert!(!timer.pause(Duration::from_secs(10), &mut rx_stop).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        // already stopped: returns right away
        assert!(!timer.pause(Duration::from_secs(10), &mut rx_stop).await);
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new(1000);
        clock.advance(61);
        assert_eq!(clock.now(), 1061);
        clock.set(5);
        assert_eq!(clock.now(), 5);
        assert!(SystemClock.now() > 1_600_000_000);
    }
}
