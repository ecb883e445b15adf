use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{DelayingQueue, DelayingQueueConfig, Queue, QueueConfig, QueueKey, DEFAULT_HEARTBEAT};
use super::waiting::{WaitFor, WaitingHeap};
use super::work_queue::WorkQueue;
use crate::clock::Clock;
use crate::error::{Result, WorkQueueError};
use crate::signal::{stop_channel, StopHandle, StopSignal};

/// Work queue decorator that admits items after a delay.
///
/// Delayed requests go through a bounded channel to one dedicated thread that owns
/// the waiting heap, so no lock guards the heap itself.
pub struct DelayingWorkQueue<K: QueueKey> {
    queue: Arc<dyn Queue<K>>,
    clock: Arc<dyn Clock>,
    stop: StopHandle,
    stop_signal: StopSignal,
    requests: Sender<WaitFor<K>>,
    waiting_loop: Mutex<Option<JoinHandle<()>>>,
    // Set before the waiting loop stops, so add_after rejects items the loop would never read
    shutting_down: AtomicBool,
    name: String,
}

impl<K: QueueKey> DelayingWorkQueue<K> {
    /// # Panics
    ///
    /// Panics if the waiting loop thread cannot be spawned.
    pub fn new() -> Self {
        Self::with_config(DelayingQueueConfig::default())
    }

    /// # Panics
    ///
    /// Panics if the waiting loop thread cannot be spawned.
    pub fn with_config(config: DelayingQueueConfig<K>) -> Self {
        match Self::try_with_config(config) {
            Ok(queue) => queue,
            Err(e) => panic!("failed to start delaying queue: {e}"),
        }
    }

    pub fn try_with_config(config: DelayingQueueConfig<K>) -> Result<Self> {
        let DelayingQueueConfig {
            name,
            clock,
            metrics,
            queue,
            heartbeat,
            request_capacity,
        } = config;

        let queue: Arc<dyn Queue<K>> = match queue {
            Some(queue) => queue,
            None => Arc::new(WorkQueue::with_config(QueueConfig {
                name: name.clone(),
                clock: clock.clone(),
                metrics,
                ..Default::default()
            })),
        };

        let heartbeat = if heartbeat.is_zero() {
            warn!("⚠️ Zero heartbeat for delaying queue '{}', using {:?}", name, DEFAULT_HEARTBEAT);
            DEFAULT_HEARTBEAT
        } else {
            heartbeat
        };

        let (requests, inbound) = bounded(request_capacity);
        let (stop, stop_signal) = stop_channel();

        let waiting_loop = WaitingLoop {
            queue: queue.clone(),
            clock: clock.clone(),
            stop: stop_signal.clone(),
            inbound,
            heartbeat,
        };
        let handle = thread::Builder::new()
            .name(if name.is_empty() {
                "delaying-queue".to_string()
            } else {
                format!("{name}-delaying")
            })
            .spawn(move || waiting_loop.run())
            .map_err(|e| WorkQueueError::ThreadSpawn(e.to_string()))?;

        debug!("🚀 DelayingWorkQueue '{}' initialized (heartbeat: {:?}, capacity: {})", name, heartbeat, request_capacity);

        Ok(Self {
            queue,
            clock,
            stop,
            stop_signal,
            requests,
            waiting_loop: Mutex::new(Some(handle)),
            shutting_down: AtomicBool::new(false),
            name,
        })
    }

    /// Stop the waiting loop and wait for it to exit. Only the first call does anything.
    fn stop_waiting_loop(&self) {
        if !self.stop.stop() {
            return;
        }
        let handle = self.waiting_loop.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("❌ Waiting loop of '{}' panicked", self.name);
            }
        }
        debug!("🛑 Waiting loop of '{}' stopped", self.name);
    }
}

impl<K: QueueKey> Default for DelayingWorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: QueueKey> Queue<K> for DelayingWorkQueue<K> {
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
        self.shutting_down.store(true, Ordering::SeqCst);
        // Always forward: this also cuts short a drain started elsewhere
        self.queue.shut_down();
        self.stop_waiting_loop();
    }

    fn shut_down_with_drain(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop_waiting_loop();
        self.queue.shut_down_with_drain();
    }

    fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst) || self.queue.shutting_down()
    }
}

impl<K: QueueKey> DelayingQueue<K> for DelayingWorkQueue<K> {
    fn add_after(&self, item: K, delay: Duration) {
        if self.shutting_down() {
            return;
        }

        if delay.is_zero() {
            self.add(item);
            return;
        }

        let Some(ready_at) = self.clock.now().checked_add(delay) else {
            warn!("⚠️ Delay {:?} overflows the clock on '{}', dropping item", delay, self.name);
            return;
        };

        select! {
            send(self.requests, WaitFor { data: item, ready_at }) -> _ => {
                // Shutdown raced with this call after the check above
                if self.stop.is_stopped() {
                    warn!("⚠️ Delaying queue '{}' shut down while an item was scheduled, dropping it", self.name);
                }
            }
            // Unblocks a full channel once shutdown starts
            recv(self.stop_signal.receiver()) -> _ => {}
        }
    }
}

impl<K: QueueKey> Drop for DelayingWorkQueue<K> {
    fn drop(&mut self) {
        self.stop_waiting_loop();
    }
}

/// State owned by the waiting loop thread
struct WaitingLoop<K: QueueKey> {
    queue: Arc<dyn Queue<K>>,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    inbound: Receiver<WaitFor<K>>,
    heartbeat: Duration,
}

impl<K: QueueKey> WaitingLoop<K> {
    fn run(self) {
        // Bounds how long a missed timer can delay admission. Dropped when the loop exits.
        let heartbeat = self.clock.ticker(self.heartbeat);
        let mut waiting = WaitingHeap::new();

        debug!("📋 Delaying queue waiting loop started");

        loop {
            if self.queue.shutting_down() {
                break;
            }

            let now = self.clock.now();
            while let Some(item) = waiting.pop_ready(now) {
                self.queue.add(item);
            }

            let next_ready = match waiting.next_ready_at() {
                Some(ready_at) => self.clock.after(ready_at.saturating_duration_since(now)),
                None => crossbeam_channel::never(),
            };

            select! {
                recv(self.stop.receiver()) -> _ => break,
                recv(heartbeat) -> _ => {}
                recv(next_ready) -> _ => {}
                recv(self.inbound) -> request => {
                    let Ok(request) = request else {
                        break;
                    };
                    self.schedule(&mut waiting, request);

                    // Take whatever else already arrived before re-arming the timer
                    while let Ok(request) = self.inbound.try_recv() {
                        self.schedule(&mut waiting, request);
                    }
                    debug!("📥 {} items waiting for admission", waiting.len());
                }
            }
        }

        info!("📋 Delaying queue waiting loop exited with {} items pending", waiting.len());
    }

    fn schedule(&self, waiting: &mut WaitingHeap<K>, request: WaitFor<K>) {
        if request.ready_at > self.clock.now() {
            waiting.insert(request);
        } else {
            self.queue.add(request.data);
        }
    }
}
