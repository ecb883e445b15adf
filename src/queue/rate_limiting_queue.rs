use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::delaying_queue::DelayingWorkQueue;
use super::metrics::MetricsProvider;
use super::rate_limiter::RateLimiter;
use super::types::{DelayingQueue, DelayingQueueConfig, Queue, QueueKey, RateLimitingQueue, RateLimitingQueueConfig};

/// Delaying queue that asks a [`RateLimiter`] how long each retry should wait
pub struct RateLimitingWorkQueue<K: QueueKey> {
    queue: Arc<dyn DelayingQueue<K>>,
    rate_limiter: Box<dyn RateLimiter<K>>,
    name: String,
    metrics: Option<Arc<dyn MetricsProvider>>,
}

impl<K: QueueKey> RateLimitingWorkQueue<K> {
    /// # Panics
    ///
    /// Panics if the delaying loop thread cannot be spawned.
    pub fn new(rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self::with_config(rate_limiter, RateLimitingQueueConfig::default())
    }

    /// # Panics
    ///
    /// Panics if a delaying queue has to be built and its loop thread cannot be spawned.
    pub fn with_config(rate_limiter: impl RateLimiter<K> + 'static, config: RateLimitingQueueConfig<K>) -> Self {
        let RateLimitingQueueConfig {
            name,
            clock,
            metrics,
            delaying_queue,
        } = config;

        let queue: Arc<dyn DelayingQueue<K>> = match delaying_queue {
            Some(queue) => queue,
            None => Arc::new(DelayingWorkQueue::with_config(DelayingQueueConfig {
                name: name.clone(),
                clock,
                metrics: metrics.clone(),
                ..Default::default()
            })),
        };

        // Retries are only counted for named queues, like every other metric
        let metrics = metrics.filter(|_| !name.is_empty());

        Self {
            queue,
            rate_limiter: Box::new(rate_limiter),
            name,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<K: QueueKey> Queue<K> for RateLimitingWorkQueue<K> {
    fn add(&self, item: K) {
        self.queue.add(item);
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn get(&self) -> Option<K> {
        self.queue.get()
    }

    fn done(&self, item: &K) {
        self.queue.done(item);
    }

    fn shut_down(&self) {
        self.queue.shut_down();
    }

    fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain();
    }

    fn shutting_down(&self) -> bool {
        self.queue.shutting_down()
    }
}

impl<K: QueueKey> DelayingQueue<K> for RateLimitingWorkQueue<K> {
    fn add_after(&self, item: K, delay: Duration) {
        self.queue.add_after(item, delay);
    }
}

impl<K: QueueKey> RateLimitingQueue<K> for RateLimitingWorkQueue<K> {
    fn add_rate_limited(&self, item: K) {
        let delay = self.rate_limiter.when(&item);
        if let Some(metrics) = &self.metrics {
            metrics.retry(&self.name);
        }
        debug!("📤 Requeue on '{}' in {:?}", self.name, delay);
        self.queue.add_after(item, delay);
    }

    fn forget(&self, item: &K) {
        self.rate_limiter.forget(item);
    }

    fn num_requeues(&self, item: &K) -> usize {
        self.rate_limiter.num_requeues(item)
    }
}
