//! Authentication counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Request and signing counters for one orchestrator
///
/// `total_requests` is bumped when a request starts; success or failure is
/// recorded once it resolves, so in-flight requests count only toward the total.
#[derive(Debug, Default)]
pub struct AuthMetrics {
    total_requests: AtomicU64,
    successful_auth: AtomicU64,
    failed_auth: AtomicU64,
    total_auth_time_us: AtomicU64,
    auth_samples: AtomicU64,
}

impl AuthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self) {
        self.successful_auth.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed_auth.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_auth_time(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.total_auth_time_us.fetch_add(micros, Ordering::SeqCst);
        self.auth_samples.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> AuthMetricsSnapshot {
        // Outcomes first, then the total, so outcomes never exceed it
        let successful_auth = self.successful_auth.load(Ordering::SeqCst);
        let failed_auth = self.failed_auth.load(Ordering::SeqCst);
        let total_requests = self.total_requests.load(Ordering::SeqCst);

        let samples = self.auth_samples.load(Ordering::SeqCst);
        let average_auth_time_ms = if samples == 0 {
            0.0
        } else {
            self.total_auth_time_us.load(Ordering::SeqCst) as f64 / samples as f64 / 1000.0
        };

        AuthMetricsSnapshot {
            total_requests,
            successful_auth,
            failed_auth,
            average_auth_time_ms,
        }
    }
}

/// Point-in-time authentication metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AuthMetricsSnapshot {
    pub total_requests: u64,
    pub successful_auth: u64,
    pub failed_auth: u64,
    pub average_auth_time_ms: f64,
}

impl AuthMetricsSnapshot {
    /// Fraction of requests that succeeded, 0.0 when nothing has run
    pub fn success_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_auth as f64 / self.total_requests as f64
    }

    /// Success rate as a percentage, 0-100
    pub fn success_rate(&self) -> f64 {
        self.success_ratio() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_is_all_zero() {
        let snapshot = AuthMetrics::new().snapshot();
        assert_eq!(snapshot, AuthMetricsSnapshot::default());
        assert_eq!(snapshot.success_rate(), 0.0);
        assert!(!snapshot.average_auth_time_ms.is_nan());
    }

    #[test]
    fn test_counters() {
        let metrics = AuthMetrics::new();
        for _ in 0..4 {
            metrics.begin();
        }
        metrics.record_success();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_auth_time(Duration::from_millis(2));
        metrics.record_auth_time(Duration::from_millis(4));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.successful_auth, 3);
        assert_eq!(snapshot.failed_auth, 1);
        assert_eq!(snapshot.success_rate(), 75.0);
        assert!((snapshot.average_auth_time_ms - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = std::sync::Arc::new(AuthMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.begin();
                        metrics.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 8000);
        assert_eq!(snapshot.successful_auth, 8000);
    }
}
