//! Trailing request and error windows for admission statistics.
//!
//! Purely observational. Timestamps are process-local and pruned to the last
//! hour on every write.

use kwharvest_core::{OperationClass, Provider};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Aggregate admission statistics across every provider and operation class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateLimitStats {
    /// Requests started in the last second.
    pub requests_per_second: u64,
    /// Requests started in the last minute.
    pub requests_per_minute: u64,
    /// Requests started in the last hour.
    pub requests_per_hour: u64,
    /// Errors divided by requests over the last hour.
    pub error_rate: f64,
    /// Calls currently executing.
    pub active_connections: u64,
    /// Calls waiting in the in-process admission queue.
    pub queued_requests: u64,
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    errors: VecDeque<Instant>,
    active: u64,
    queued: u64,
}

impl Window {
    fn prune(events: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = events.front() {
            if now.saturating_duration_since(front) >= HOUR {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_since(events: &VecDeque<Instant>, now: Instant, span: Duration) -> u64 {
        events
            .iter()
            .rev()
            .take_while(|&&at| now.saturating_duration_since(at) < span)
            .count() as u64
    }
}

/// Request, error, in-flight and queued counters keyed by provider and operation class.
#[derive(Debug, Default)]
pub struct StatsWindow {
    windows: Mutex<HashMap<(Provider, OperationClass), Window>>,
}

impl StatsWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Provider, OperationClass), Window>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that a call started.
    pub fn record_request(&self, provider: Provider, operation: OperationClass) {
        let now = Instant::now();
        let mut windows = self.lock();
        let window = windows.entry((provider, operation)).or_default();
        window.requests.push_back(now);
        Window::prune(&mut window.requests, now);
    }

    /// Records that a call failed.
    pub fn record_error(&self, provider: Provider, operation: OperationClass) {
        let now = Instant::now();
        let mut windows = self.lock();
        let window = windows.entry((provider, operation)).or_default();
        window.errors.push_back(now);
        Window::prune(&mut window.errors, now);
    }

    /// Adjusts the in-flight counter.
    pub fn connection_started(&self, provider: Provider, operation: OperationClass) {
        self.lock().entry((provider, operation)).or_default().active += 1;
    }

    /// Adjusts the in-flight counter. Never goes below zero.
    pub fn connection_finished(&self, provider: Provider, operation: OperationClass) {
        let mut windows = self.lock();
        let window = windows.entry((provider, operation)).or_default();
        window.active = window.active.saturating_sub(1);
    }

    /// Adjusts the queued counter.
    pub fn enqueued(&self, provider: Provider, operation: OperationClass) {
        self.lock().entry((provider, operation)).or_default().queued += 1;
    }

    /// Adjusts the queued counter. Never goes below zero.
    pub fn dequeued(&self, provider: Provider, operation: OperationClass) {
        let mut windows = self.lock();
        let window = windows.entry((provider, operation)).or_default();
        window.queued = window.queued.saturating_sub(1);
    }

    /// Aggregates every window.
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> RateLimitStats {
        let now = Instant::now();
        let windows = self.lock();

        let mut stats = RateLimitStats::default();
        let mut errors = 0u64;
        for window in windows.values() {
            stats.requests_per_second += Window::count_since(&window.requests, now, SECOND);
            stats.requests_per_minute += Window::count_since(&window.requests, now, MINUTE);
            stats.requests_per_hour += Window::count_since(&window.requests, now, HOUR);
            errors += Window::count_since(&window.errors, now, HOUR);
            stats.active_connections += window.active;
            stats.queued_requests += window.queued;
        }

        if stats.requests_per_hour > 0 {
            stats.error_rate = errors as f64 / stats.requests_per_hour as f64;
        }
        stats
    }

    /// Clears request and error history. In-flight and queued counters are kept.
    pub fn reset(&self) {
        for window in self.lock().values_mut() {
            window.requests.clear();
            window.errors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_windows_age_out() {
        let stats = StatsWindow::new();
        stats.record_request(Provider::SearchAd, OperationClass::Related);
        stats.record_request(Provider::OpenApi, OperationClass::Docs);
        stats.record_error(Provider::OpenApi, OperationClass::Docs);

        let snap = stats.snapshot();
        assert_eq!(snap.requests_per_second, 2);
        assert_eq!(snap.requests_per_hour, 2);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);

        tokio::time::advance(Duration::from_secs(2)).await;
        let snap = stats.snapshot();
        assert_eq!(snap.requests_per_second, 0);
        assert_eq!(snap.requests_per_minute, 2);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let snap = stats.snapshot();
        assert_eq!(snap.requests_per_hour, 0);
        assert!(snap.error_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_saturate() {
        let stats = StatsWindow::new();
        stats.connection_finished(Provider::OpenApi, OperationClass::Docs);
        stats.dequeued(Provider::OpenApi, OperationClass::Docs);
        stats.connection_started(Provider::OpenApi, OperationClass::Docs);
        stats.enqueued(Provider::SearchAd, OperationClass::Related);

        let snap = stats.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.queued_requests, 1);
    }

    #[test]
    fn test_reset_keeps_in_flight() {
        let stats = StatsWindow::new();
        stats.record_request(Provider::SearchAd, OperationClass::Related);
        stats.connection_started(Provider::SearchAd, OperationClass::Related);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.requests_per_hour, 0);
        assert_eq!(snap.active_connections, 1);
    }
}
