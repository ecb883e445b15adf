use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::types::QueueKey;
use crate::clock::Clock;

/// Receiver of queue events. Every method has an empty default, so a provider only
/// implements the events it cares about.
///
/// `queue` is the name the queue was configured with and can be used as a label.
pub trait MetricsProvider: Send + Sync {
    /// An item was marked dirty
    fn add(&self, _queue: &str) {}
    /// An item was handed to a worker after waiting `queue_latency` in the queue
    fn get(&self, _queue: &str, _queue_latency: Duration) {}
    /// A worker finished an item it held for `work_duration`
    fn done(&self, _queue: &str, _work_duration: Duration) {}
    /// Number of items waiting to be handed out
    fn depth(&self, _queue: &str, _depth: usize) {}
    /// Total time spent on in-flight items, and the longest single one
    fn unfinished_work(&self, _queue: &str, _total: Duration, _longest: Duration) {}
    /// An item was requeued through a rate limiter
    fn retry(&self, _queue: &str) {}
}

/// Provider that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsProvider for NoopMetrics {}

/// Per-queue counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricsData {
    pub queue_name: String,
    pub adds: u64,
    pub gets: u64,
    pub completions: u64,
    pub retries: u64,
    pub depth: usize,
    pub peak_depth: usize,
    pub total_queue_latency_ms: f64,
    pub total_work_duration_ms: f64,
    pub average_queue_latency_ms: f64,
    pub average_work_duration_ms: f64,
    pub unfinished_work_secs: f64,
    pub longest_running_processor_secs: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl QueueMetricsData {
    fn new(queue_name: String) -> Self {
        Self {
            queue_name,
            adds: 0,
            gets: 0,
            completions: 0,
            retries: 0,
            depth: 0,
            peak_depth: 0,
            total_queue_latency_ms: 0.0,
            total_work_duration_ms: 0.0,
            average_queue_latency_ms: 0.0,
            average_work_duration_ms: 0.0,
            unfinished_work_secs: 0.0,
            longest_running_processor_secs: 0.0,
            last_activity: None,
        }
    }

    fn update_averages(&mut self) {
        if self.gets > 0 {
            self.average_queue_latency_ms = self.total_queue_latency_ms / self.gets as f64;
        }
        if self.completions > 0 {
            self.average_work_duration_ms = self.total_work_duration_ms / self.completions as f64;
        }
    }
}

/// In-memory metrics collector shared by any number of named queues
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    data: Arc<RwLock<FxHashMap<String, QueueMetricsData>>>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, queue: &str, apply: impl FnOnce(&mut QueueMetricsData)) {
        let mut data = self.data.write();
        let entry = data
            .entry(queue.to_string())
            .or_insert_with(|| QueueMetricsData::new(queue.to_string()));
        apply(entry);
        entry.last_activity = Some(Utc::now());
    }

    /// Snapshot of one queue's counters
    pub fn snapshot(&self, queue: &str) -> Option<QueueMetricsData> {
        self.data.read().get(queue).cloned()
    }

    /// Snapshot of every queue seen so far, sorted by name
    pub fn snapshots(&self) -> Vec<QueueMetricsData> {
        let mut all: Vec<_> = self.data.read().values().cloned().collect();
        all.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));
        all
    }

    /// Render every queue's counters as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshots())
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.data.write().clear();
        info!("📊 Queue metrics reset");
    }

    /// Log current metrics summary
    pub fn log_summary(&self) {
        for data in self.snapshots() {
            info!("📊 Queue '{}' Summary:", data.queue_name);
            info!(
                "  Items: {} added, {} handed out, {} done, {} retried",
                data.adds, data.gets, data.completions, data.retries
            );
            info!("  Depth: {} (peak: {})", data.depth, data.peak_depth);
            info!(
                "  Avg Times: {:.2}ms in queue, {:.2}ms processing",
                data.average_queue_latency_ms, data.average_work_duration_ms
            );
        }
    }
}

impl MetricsProvider for QueueMetrics {
    fn add(&self, queue: &str) {
        self.update(queue, |m| m.adds += 1);
    }

    fn get(&self, queue: &str, queue_latency: Duration) {
        self.update(queue, |m| {
            m.gets += 1;
            m.total_queue_latency_ms += queue_latency.as_secs_f64() * 1000.0;
            m.update_averages();
        });
    }

    fn done(&self, queue: &str, work_duration: Duration) {
        self.update(queue, |m| {
            m.completions += 1;
            m.total_work_duration_ms += work_duration.as_secs_f64() * 1000.0;
            m.update_averages();
        });
    }

    fn depth(&self, queue: &str, depth: usize) {
        self.update(queue, |m| {
            m.depth = depth;
            m.peak_depth = m.peak_depth.max(depth);
        });
    }

    fn unfinished_work(&self, queue: &str, total: Duration, longest: Duration) {
        self.update(queue, |m| {
            m.unfinished_work_secs = total.as_secs_f64();
            m.longest_running_processor_secs = longest.as_secs_f64();
        });
    }

    fn retry(&self, queue: &str) {
        self.update(queue, |m| m.retries += 1);
        debug!("📊 Retry recorded for queue '{}'", queue);
    }
}

/// Per-item timing kept alongside a queue's state, under the queue's own lock
pub(crate) struct MetricsRecorder<K> {
    name: String,
    provider: Arc<dyn MetricsProvider>,
    clock: Arc<dyn Clock>,
    add_times: FxHashMap<K, Instant>,
    processing_start_times: FxHashMap<K, Instant>,
}

impl<K: QueueKey> MetricsRecorder<K> {
    pub(crate) fn new(name: String, provider: Arc<dyn MetricsProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            provider,
            clock,
            add_times: FxHashMap::default(),
            processing_start_times: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, item: &K, depth: usize) {
        self.provider.add(&self.name);
        self.provider.depth(&self.name, depth);
        if !self.add_times.contains_key(item) {
            self.add_times.insert(item.clone(), self.clock.now());
        }
    }

    pub(crate) fn get(&mut self, item: &K, depth: usize) {
        self.provider.depth(&self.name, depth);
        let now = self.clock.now();
        if let Some(added) = self.add_times.remove(item) {
            self.provider
                .get(&self.name, now.saturating_duration_since(added));
        }
        self.processing_start_times.insert(item.clone(), now);
    }

    pub(crate) fn done(&mut self, item: &K) {
        if let Some(started) = self.processing_start_times.remove(item) {
            self.provider.done(&self.name, self.clock.since(started));
        }
    }

    pub(crate) fn requeued(&mut self, depth: usize) {
        self.provider.depth(&self.name, depth);
    }

    pub(crate) fn update_unfinished_work(&self) {
        let now = self.clock.now();
        let mut total = Duration::ZERO;
        let mut longest = Duration::ZERO;
        for started in self.processing_start_times.values() {
            let running = now.saturating_duration_since(*started);
            total += running;
            longest = longest.max(running);
        }
        self.provider.unfinished_work(&self.name, total, longest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn test_basic_metrics() {
        let metrics = QueueMetrics::new();

        metrics.add("test_queue");
        metrics.depth("test_queue", 1);
        metrics.get("test_queue", Duration::from_millis(20));
        metrics.done("test_queue", Duration::from_millis(100));

        let data = metrics.snapshot("test_queue").unwrap();
        assert_eq!(data.adds, 1);
        assert_eq!(data.gets, 1);
        assert_eq!(data.completions, 1);
        assert_eq!(data.peak_depth, 1);
        assert!((data.average_work_duration_ms - 100.0).abs() < 1e-6);
        assert!((data.average_queue_latency_ms - 20.0).abs() < 1e-6);
        assert!(data.last_activity.is_some());
    }

    #[test]
    fn test_queues_are_tracked_separately() {
        let metrics = QueueMetrics::new();
        metrics.add("a");
        metrics.add("a");
        metrics.retry("b");

        let all = metrics.snapshots();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].queue_name, "a");
        assert_eq!(all[0].adds, 2);
        assert_eq!(all[1].retries, 1);

        let json = metrics.to_json().unwrap();
        assert!(json.contains("\"queue_name\": \"a\""));

        metrics.reset();
        assert!(metrics.snapshots().is_empty());
    }

    #[test]
    fn test_recorder_measures_latency_and_work() {
        let clock = Arc::new(FakeClock::new());
        let metrics = QueueMetrics::new();
        let mut recorder: MetricsRecorder<&'static str> =
            MetricsRecorder::new("jobs".to_string(), Arc::new(metrics.clone()), clock.clone());

        recorder.add(&"a", 1);
        clock.step(Duration::from_millis(30));
        recorder.get(&"a", 0);
        clock.step(Duration::from_millis(70));

        recorder.update_unfinished_work();
        let data = metrics.snapshot("jobs").unwrap();
        assert!((data.unfinished_work_secs - 0.07).abs() < 1e-9);

        recorder.done(&"a");
        let data = metrics.snapshot("jobs").unwrap();
        assert!((data.average_queue_latency_ms - 30.0).abs() < 1e-6);
        assert!((data.average_work_duration_ms - 70.0).abs() < 1e-6);
    }
}
