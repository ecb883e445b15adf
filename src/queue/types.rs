use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsProvider;
use crate::clock::{Clock, RealClock};

/// How often a named queue reports in-flight work to its metrics provider
pub const DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD: Duration = Duration::from_millis(500);

/// Upper bound on how long the delaying loop sleeps before re-checking its heap
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Capacity of the delaying loop's inbound request channel
pub const DEFAULT_REQUEST_CAPACITY: usize = 1000;

/// Anything usable as a work item identity
pub trait QueueKey: Eq + Hash + Clone + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Eq + Hash + Clone + Send + Sync + 'static {}

/// Deduplicating work queue.
///
/// Items handed out by [`Queue::get`] stay "processing" until [`Queue::done`] is
/// called; an item added again in the meantime is delivered once more afterwards,
/// never concurrently.
pub trait Queue<K>: Send + Sync {
    /// Mark an item as needing processing
    fn add(&self, item: K);

    /// Number of items waiting to be handed out. Informational only; it races with
    /// concurrent `add`/`get` and must not gate either.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until an item is available. `None` means the queue is shut down and
    /// the caller should stop.
    fn get(&self) -> Option<K>;

    /// Mark an item as finished. If it was added again while processing it is
    /// requeued.
    fn done(&self, item: &K);

    /// Reject new items and release every blocked `get`
    fn shut_down(&self);

    /// Like [`Queue::shut_down`], but also blocks until every handed-out item has
    /// been marked done. A concurrent `shut_down` cuts the wait short.
    fn shut_down_with_drain(&self);

    fn shutting_down(&self) -> bool;
}

/// Queue that can admit items at a later time
pub trait DelayingQueue<K>: Queue<K> {
    /// Add `item` once `delay` has passed. A zero delay adds immediately.
    fn add_after(&self, item: K, delay: Duration);
}

/// Queue that paces requeues through a [`crate::RateLimiter`]
pub trait RateLimitingQueue<K>: DelayingQueue<K> {
    /// Add `item` after the rate limiter says it's ok
    fn add_rate_limited(&self, item: K);

    /// Stop tracking retries for `item`. Only clears the limiter; the caller still
    /// has to call `done`.
    fn forget(&self, item: &K);

    /// How many times `item` has been requeued through the limiter
    fn num_requeues(&self, item: &K) -> usize;
}

/// Options for [`super::WorkQueue`]
#[derive(Clone)]
pub struct QueueConfig {
    /// Queue name. Metrics are only recorded for named queues.
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<Arc<dyn MetricsProvider>>,
    pub unfinished_work_update_period: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            clock: Arc::new(RealClock),
            metrics: None,
            unfinished_work_update_period: DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD,
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("name", &self.name)
            .field("metrics", &self.metrics.is_some())
            .field("unfinished_work_update_period", &self.unfinished_work_update_period)
            .finish()
    }
}

/// Options for [`super::DelayingWorkQueue`]
pub struct DelayingQueueConfig<K> {
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<Arc<dyn MetricsProvider>>,
    /// Base queue to decorate. A new [`super::WorkQueue`] is built when absent.
    pub queue: Option<Arc<dyn Queue<K>>>,
    pub heartbeat: Duration,
    pub request_capacity: usize,
}

impl<K> Default for DelayingQueueConfig<K> {
    fn default() -> Self {
        Self {
            name: String::new(),
            clock: Arc::new(RealClock),
            metrics: None,
            queue: None,
            heartbeat: DEFAULT_HEARTBEAT,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl<K> fmt::Debug for DelayingQueueConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayingQueueConfig")
            .field("name", &self.name)
            .field("metrics", &self.metrics.is_some())
            .field("custom_queue", &self.queue.is_some())
            .field("heartbeat", &self.heartbeat)
            .field("request_capacity", &self.request_capacity)
            .finish()
    }
}

/// Options for [`super::RateLimitingWorkQueue`]
pub struct RateLimitingQueueConfig<K> {
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<Arc<dyn MetricsProvider>>,
    /// Delaying queue to decorate. A new [`super::DelayingWorkQueue`] is built when absent.
    pub delaying_queue: Option<Arc<dyn DelayingQueue<K>>>,
}

impl<K> Default for RateLimitingQueueConfig<K> {
    fn default() -> Self {
        Self {
            name: String::new(),
            clock: Arc::new(RealClock),
            metrics: None,
            delaying_queue: None,
        }
    }
}

impl<K> fmt::Debug for RateLimitingQueueConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueueConfig")
            .field("name", &self.name)
            .field("metrics", &self.metrics.is_some())
            .field("custom_delaying_queue", &self.delaying_queue.is_some())
            .finish()
    }
}
