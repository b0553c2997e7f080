use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub requests_added: u64,
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub retries: u64,
    pub retries_vetoed: u64,
    pub loaded_from_cache: u64,
    pub late_results_dropped: u64,
    pub in_flight: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct QueueMetrics {
    inner: Arc<QueueMetricsInner>,
}

#[derive(Debug, Default)]
struct QueueMetricsInner {
    requests_added: AtomicU64,
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    retries: AtomicU64,
    retries_vetoed: AtomicU64,
    loaded_from_cache: AtomicU64,
    late_results_dropped: AtomicU64,
    in_flight: AtomicU64,
}

impl QueueMetrics {
    pub(crate) fn record_added(&self) {
        self.inner.requests_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt_ended(&self) {
        let _ = self
            .inner
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(1))
            });
    }

    pub(crate) fn record_succeeded(&self, from_cache: bool) {
        self.inner
            .requests_succeeded
            .fetch_add(1, Ordering::Relaxed);
        if from_cache {
            self.inner.loaded_from_cache.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failed(&self) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.inner
            .requests_cancelled
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_vetoed(&self) {
        self.inner.retries_vetoed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late_result(&self) {
        self.inner
            .late_results_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            requests_added: self.inner.requests_added.load(Ordering::Relaxed),
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.inner.requests_cancelled.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            retries_vetoed: self.inner.retries_vetoed.load(Ordering::Relaxed),
            loaded_from_cache: self.inner.loaded_from_cache.load(Ordering::Relaxed),
            late_results_dropped: self.inner.late_results_dropped.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
        }
    }
}
