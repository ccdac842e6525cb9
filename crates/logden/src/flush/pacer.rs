//! Adaptive pacing between flushes.
//!
//! The worker sleeps in 100 ms steps and watches the active backlog: a burst
//! breaks the wait immediately, a high backlog breaks it after 2.5 s, and a
//! single stale entry is never left waiting longer than 5 s. An idle queue
//! keeps the worker asleep, so quiet processes get no wake-up churn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Default poll granularity.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default backlog above which a wait breaks immediately.
pub const DEFAULT_BURST_THRESHOLD: usize = 2000;

/// Default backlog treated as "high".
pub const DEFAULT_HIGH_BACKLOG: usize = 1000;

/// Default wait bound for a high backlog.
pub const DEFAULT_HIGH_BACKLOG_WAIT: Duration = Duration::from_millis(2500);

/// Default wait bound for any non-empty backlog.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Configuration for the adaptive pacer.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Sleep granularity of the busy-poll.
    pub poll_interval: Duration,
    /// Backlog above which the wait breaks immediately.
    pub burst_threshold: usize,
    /// Backlog at which the wait breaks after `high_backlog_wait`.
    pub high_backlog: usize,
    /// Cumulative wait bound once the backlog is high.
    pub high_backlog_wait: Duration,
    /// Cumulative wait bound once the backlog is non-empty.
    pub max_wait: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            burst_threshold: DEFAULT_BURST_THRESHOLD,
            high_backlog: DEFAULT_HIGH_BACKLOG,
            high_backlog_wait: DEFAULT_HIGH_BACKLOG_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl PacerConfig {
    /// Overrides the poll granularity.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the burst threshold.
    pub fn with_burst_threshold(mut self, threshold: usize) -> Self {
        self.burst_threshold = threshold;
        self
    }

    /// Overrides the high-backlog threshold and its wait bound.
    pub fn with_high_backlog(mut self, backlog: usize, wait: Duration) -> Self {
        self.high_backlog = backlog;
        self.high_backlog_wait = wait;
        self
    }

    /// Overrides the wait bound for any non-empty backlog.
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }
}

/// Computes the wait between flushes from backlog depth and elapsed time.
#[derive(Debug, Clone, Default)]
pub struct AdaptivePacer {
    config: PacerConfig,
}

impl AdaptivePacer {
    /// Creates a pacer with the given configuration.
    pub fn new(config: PacerConfig) -> Self {
        Self { config }
    }

    /// Sleeps until the backlog warrants the next flush or cancellation is
    /// requested.
    ///
    /// `backlog` is sampled once per poll step; an empty queue keeps
    /// waiting indefinitely (there is nothing to flush).
    pub fn wait(&self, backlog: impl Fn() -> usize, cancelled: &AtomicBool) {
        let mut waited = Duration::ZERO;
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            let n = backlog();
            if n > self.config.burst_threshold {
                return;
            }
            if n >= self.config.high_backlog && waited >= self.config.high_backlog_wait {
                return;
            }
            if n >= 1 && waited >= self.config.max_wait {
                return;
            }
            thread::sleep(self.config.poll_interval);
            waited += self.config.poll_interval;
        }
    }
}
