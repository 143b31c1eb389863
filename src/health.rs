//! # Poll Health Statistics
//!
//! `HealthReporter` is the default `SuccessReporter`. It counts outcomes, keeps
//! an error rate over the last hour in one-minute windows, and logs when the
//! bus goes from healthy to failing and back.

use crate::polling::{SuccessOutcome, SuccessReporter};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Time-windowed counter for rate calculation
#[derive(Debug, Clone)]
struct WindowedCounter {
    windows: Vec<(Instant, u64)>,
    window_duration: Duration,
    max_windows: usize,
}

impl WindowedCounter {
    fn new(window_duration: Duration, max_windows: usize) -> Self {
        Self {
            windows: Vec::new(),
            window_duration,
            max_windows,
        }
    }

    fn increment(&mut self, now: Instant) {
        self.cleanup_old_windows(now);

        if let Some(last) = self.windows.last_mut() {
            if now.duration_since(last.0) < self.window_duration {
                last.1 += 1;
                return;
            }
        }

        self.windows.push((now, 1));
    }

    /// Events per minute across the retained windows.
    fn rate(&mut self, now: Instant) -> f64 {
        self.cleanup_old_windows(now);

        let Some(first) = self.windows.first() else {
            return 0.0;
        };
        let total: u64 = self.windows.iter().map(|(_, count)| count).sum();
        let minutes = now
            .duration_since(first.0)
            .max(self.window_duration)
            .as_secs_f64()
            / 60.0;
        total as f64 / minutes
    }

    fn total(&self) -> u64 {
        self.windows.iter().map(|(_, count)| count).sum()
    }

    fn cleanup_old_windows(&mut self, now: Instant) {
        let cutoff = self.window_duration * self.max_windows as u32;
        self.windows
            .retain(|(time, _)| now.duration_since(*time) < cutoff);

        if self.windows.len() > self.max_windows {
            self.windows.drain(0..self.windows.len() - self.max_windows);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No poll has completed yet.
    Unknown,
    Healthy,
    Failing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub state: HealthState,
    pub successes: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub consecutive_failures: u32,
    pub failures_last_hour: u64,
    pub failures_per_minute: f64,
}

pub struct HealthReporter {
    name: String,
    successes: u64,
    errors: u64,
    timeouts: u64,
    consecutive_failures: u32,
    failing_after: u32,
    failures: WindowedCounter,
    state: HealthState,
}

impl HealthReporter {
    /// `failing_after` consecutive failed polls mark the bus as failing.
    pub fn new(name: impl Into<String>, failing_after: u32) -> Self {
        HealthReporter {
            name: name.into(),
            successes: 0,
            errors: 0,
            timeouts: 0,
            consecutive_failures: 0,
            failing_after: failing_after.max(1),
            failures: WindowedCounter::new(Duration::from_secs(60), 60),
            state: HealthState::Unknown,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn snapshot(&mut self) -> HealthSnapshot {
        let now = Instant::now();
        HealthSnapshot {
            name: self.name.clone(),
            state: self.state,
            successes: self.successes,
            errors: self.errors,
            timeouts: self.timeouts,
            consecutive_failures: self.consecutive_failures,
            failures_per_minute: self.failures.rate(now),
            failures_last_hour: self.failures.total(),
        }
    }

    fn record(&mut self, outcome: SuccessOutcome) {
        match outcome {
            SuccessOutcome::Success => {
                self.successes += 1;
                if self.state == HealthState::Failing {
                    info!(
                        "{}: recovered after {} failed polls",
                        self.name, self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.state = HealthState::Healthy;
            }
            SuccessOutcome::SuccessWithError | SuccessOutcome::Timeout => {
                if outcome == SuccessOutcome::Timeout {
                    self.timeouts += 1;
                } else {
                    self.errors += 1;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.failures.increment(Instant::now());
                if self.consecutive_failures >= self.failing_after && self.state != HealthState::Failing {
                    warn!(
                        "{}: {} consecutive failed polls ({} failures in the last hour)",
                        self.name,
                        self.consecutive_failures,
                        self.failures.total()
                    );
                    self.state = HealthState::Failing;
                }
            }
        }
    }
}

impl SuccessReporter for HealthReporter {
    fn report_success(&mut self) {
        self.record(SuccessOutcome::Success);
    }

    fn report_success_with_error(&mut self) {
        self.record(SuccessOutcome::SuccessWithError);
    }

    fn report_timeout(&mut self) {
        self.record(SuccessOutcome::Timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut health = HealthReporter::new("bus", 2);
        assert_eq!(health.state(), HealthState::Unknown);

        health.report_success();
        assert_eq!(health.state(), HealthState::Healthy);

        health.report_timeout();
        assert_eq!(health.state(), HealthState::Healthy);
        health.report_success_with_error();
        assert_eq!(health.state(), HealthState::Failing);

        health.report_success();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.state, HealthState::Healthy);
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.failures_last_hour, 2);
    }

    #[test]
    fn test_windowed_counter() {
        let mut counter = WindowedCounter::new(Duration::from_secs(60), 3);
        let start = Instant::now();
        counter.increment(start);
        counter.increment(start + Duration::from_secs(10));
        counter.increment(start + Duration::from_secs(70));
        assert_eq!(counter.windows.len(), 2);
        assert_eq!(counter.total(), 3);

        // everything ages out after max_windows * window_duration
        counter.cleanup_old_windows(start + Duration::from_secs(400));
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.rate(start + Duration::from_secs(400)), 0.0);
    }
}
