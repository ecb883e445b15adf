use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, info, warn};

use super::metrics::MetricsRecorder;
use super::types::{Queue, QueueConfig, QueueKey};

struct QueueState<K> {
    /// Order in which items are handed out. Every element is dirty and not processing.
    queue: VecDeque<K>,
    /// Items that need processing
    dirty: FxHashSet<K>,
    /// Items currently held by a worker. May also be dirty, in which case they are
    /// requeued on `done`.
    processing: FxHashSet<K>,
    shutting_down: bool,
    drain: bool,
    metrics: Option<MetricsRecorder<K>>,
}

struct QueueInner<K> {
    state: Mutex<QueueState<K>>,
    cond: Condvar,
}

/// Deduplicating FIFO work queue with in-flight tracking
pub struct WorkQueue<K> {
    inner: Arc<QueueInner<K>>,
    name: String,
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create an unnamed queue on the real clock
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let metrics = match (&config.metrics, config.name.is_empty()) {
            (Some(provider), false) => Some(MetricsRecorder::new(
                config.name.clone(),
                provider.clone(),
                config.clock.clone(),
            )),
            (Some(_), true) => {
                debug!("Metrics provider ignored for unnamed queue");
                None
            }
            (None, _) => None,
        };
        let with_metrics = metrics.is_some();

        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: FxHashSet::default(),
                processing: FxHashSet::default(),
                shutting_down: false,
                drain: false,
                metrics,
            }),
            cond: Condvar::new(),
        });

        if with_metrics {
            Self::start_unfinished_work_reporter(&inner, &config);
        }

        debug!("🚀 WorkQueue '{}' initialized", config.name);
        Self {
            inner,
            name: config.name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Periodically report in-flight work until the queue shuts down or is dropped
    fn start_unfinished_work_reporter(inner: &Arc<QueueInner<K>>, config: &QueueConfig) {
        let weak: Weak<QueueInner<K>> = Arc::downgrade(inner);
        let ticker = config.clock.ticker(config.unfinished_work_update_period);
        let spawned = thread::Builder::new()
            .name(format!("{}-unfinished-work", config.name))
            .spawn(move || {
                for _ in ticker.iter() {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let state = inner.state.lock();
                    if state.shutting_down {
                        return;
                    }
                    if let Some(metrics) = &state.metrics {
                        metrics.update_unfinished_work();
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("⚠️ Unfinished work reporter for '{}' not started: {}", config.name, e);
        }
    }

    /// Number of items currently held by workers
    pub fn processing_len(&self) -> usize {
        self.inner.state.lock().processing.len()
    }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: QueueKey> Queue<K> for WorkQueue<K> {
    fn add(&self, item: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        let depth = state.queue.len() + usize::from(!state.processing.contains(&item));
        if let Some(metrics) = state.metrics.as_mut() {
            metrics.add(&item, depth);
        }

        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        self.inner.cond.notify_one();
    }

    fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn get(&self) -> Option<K> {
        let mut state = self.inner.state.lock();
        while state.queue.is_empty() && !state.shutting_down {
            self.inner.cond.wait(&mut state);
        }

        // Empty here means we are shutting down
        let item = state.queue.pop_front()?;

        state.processing.insert(item.clone());
        state.dirty.remove(&item);
        let depth = state.queue.len();
        if let Some(metrics) = state.metrics.as_mut() {
            metrics.get(&item, depth);
        }

        Some(item)
    }

    fn done(&self, item: &K) {
        let mut state = self.inner.state.lock();
        if let Some(metrics) = state.metrics.as_mut() {
            metrics.done(item);
        }

        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            let depth = state.queue.len();
            if let Some(metrics) = state.metrics.as_mut() {
                metrics.requeued(depth);
            }
            self.inner.cond.notify_one();
        } else if state.processing.is_empty() {
            // Wake a draining shutdown. Get waiters share the condvar, so wake everyone.
            self.inner.cond.notify_all();
        }
    }

    fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        state.drain = false;
        state.shutting_down = true;
        self.inner.cond.notify_all();
        info!("🛑 WorkQueue '{}' shut down", self.name);
    }

    fn shut_down_with_drain(&self) {
        let mut state = self.inner.state.lock();
        state.drain = true;
        state.shutting_down = true;
        self.inner.cond.notify_all();

        if !state.processing.is_empty() {
            info!(
                "⏳ WorkQueue '{}' draining {} in-flight items",
                self.name,
                state.processing.len()
            );
        }
        while !state.processing.is_empty() && state.drain {
            self.inner.cond.wait(&mut state);
        }
        info!("🛑 WorkQueue '{}' shut down (drained: {})", self.name, state.processing.is_empty());
    }

    fn shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}
