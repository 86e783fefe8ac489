use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use histogram::Histogram;

/// Counters and latency histograms the Dispatcher updates on every
/// resolution. Read-only snapshots are exposed through [`MetricsView`];
/// nothing here is specific to one statement or connection.
pub struct Metrics {
    queries_total: AtomicU64,
    queries_errored: AtomicU64,
    retries_total: AtomicU64,
    prepares_total: AtomicU64,
    keyspace_switches_total: AtomicU64,
    latency_us: Mutex<Histogram>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            queries_total: AtomicU64::new(0),
            queries_errored: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            prepares_total: AtomicU64::new(0),
            keyspace_switches_total: AtomicU64::new(0),
            latency_us: Mutex::new(Histogram::new()),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_queries_total(&self) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_queries_errored(&self) {
        self.queries_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retries(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_prepares(&self) {
        self.prepares_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_keyspace_switches(&self) {
        self.keyspace_switches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn log_query_latency(&self, latency: Duration) {
        let _ = self
            .latency_us
            .lock()
            .unwrap()
            .increment(latency.as_micros() as u64);
    }

    pub fn view(&self) -> MetricsView {
        let histogram = self.latency_us.lock().unwrap();
        MetricsView {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_errored: self.queries_errored.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            prepares_total: self.prepares_total.load(Ordering::Relaxed),
            keyspace_switches_total: self.keyspace_switches_total.load(Ordering::Relaxed),
            latency_p50_us: histogram.percentile(50.0).ok(),
            latency_p99_us: histogram.percentile(99.0).ok(),
        }
    }
}

/// A consistent point-in-time snapshot of [`Metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsView {
    pub queries_total: u64,
    pub queries_errored: u64,
    pub retries_total: u64,
    pub prepares_total: u64,
    pub keyspace_switches_total: u64,
    pub latency_p50_us: Option<u64>,
    pub latency_p99_us: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new();
        let view = metrics.view();
        assert_eq!(view.queries_total, 0);
        assert_eq!(view.queries_errored, 0);
    }

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new();
        metrics.inc_queries_total();
        metrics.inc_queries_total();
        metrics.inc_queries_errored();
        metrics.inc_retries();
        metrics.inc_prepares();
        metrics.inc_keyspace_switches();
        let view = metrics.view();
        assert_eq!(view.queries_total, 2);
        assert_eq!(view.queries_errored, 1);
        assert_eq!(view.retries_total, 1);
        assert_eq!(view.prepares_total, 1);
        assert_eq!(view.keyspace_switches_total, 1);
    }

    #[test]
    fn latency_samples_are_recorded() {
        let metrics = Metrics::new();
        metrics.log_query_latency(Duration::from_millis(5));
        metrics.log_query_latency(Duration::from_millis(10));
        let view = metrics.view();
        assert!(view.latency_p50_us.is_some());
    }
}
